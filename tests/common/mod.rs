#![allow(dead_code)]

pub mod mock_store;
pub mod strategies;

pub use mock_store::*;

use std::sync::Arc;
use storefront_data::{Clock, DataAccessConfig, DataAccessFacade, ManualClock};

/// Facade wired to `store` and a manual clock starting at t=0
pub fn facade_with(
    store: Arc<MockRemoteExecutor>,
    config: DataAccessConfig,
) -> (DataAccessFacade, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let facade = DataAccessFacade::builder()
        .executor(store)
        .clock(clock.clone() as Arc<dyn Clock>)
        .config(config)
        .build()
        .expect("test facade should build");
    (facade, clock)
}

/// Set the manual clock to `seconds` after the epoch start
pub fn at_second(clock: &ManualClock, seconds: u64) {
    clock.set_ms(seconds * 1_000);
}
