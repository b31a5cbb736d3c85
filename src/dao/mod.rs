/// Persisted entities shared by every storage backend.
pub mod models;
/// Session store abstraction and its backends.
pub mod session_store;
/// Storage abstraction layer errors.
pub mod storage;
