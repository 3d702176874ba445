pub(crate) mod backends;
pub(crate) mod session_store;
