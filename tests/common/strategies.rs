use proptest::prelude::*;

/// Strategy for generating resource names
pub fn resource_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z_]{0,31}"
}

/// Strategy for ordinary storefront text: product names, descriptions,
/// addresses and notes
pub fn ordinary_text_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[A-Za-z0-9 ,.!?;#()\"-]{0,120}",
        Just("Don't miss our summer sale!".to_string()),
        Just("Select a size, then add to cart.".to_string()),
        Just("12 Rue de l'Église, Apt. 3".to_string()),
        Just("Ships in 2-3 days (weekdays only)".to_string()),
        Just("Or, if you prefer, pick it up in store.".to_string()),
        Just("Great value; #1 best seller".to_string()),
        Just("Body lotion (200 ml) -- travel size".to_string()),
        Just("Rated \"excellent\" -- Vogue".to_string()),
        Just("Book: JavaScript: The Good Parts".to_string()),
    ]
}

/// Strategy for client identifiers
pub fn client_id_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,12}"
}

/// Strategy for request offsets in seconds, sorted ascending
pub fn request_offsets_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..600, 1..60).prop_map(|mut offsets| {
        offsets.sort_unstable();
        offsets
    })
}
