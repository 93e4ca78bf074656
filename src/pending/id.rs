//! Random identifiers for staged blobs and subscribers

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of pending record ids
pub const PENDING_ID_LENGTH: usize = 10;

/// Length of subscriber ids
pub const SUBSCRIBER_ID_LENGTH: usize = 3;

/// Returns a random string of `len` characters from `[A-Za-z0-9]`.
pub fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Returns true if `name` could have been produced by [`random_id`].
pub fn is_valid_id(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric())
}
