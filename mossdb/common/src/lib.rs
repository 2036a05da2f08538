//! Vocabulary shared by the storage, transaction and recovery layers of mossdb.

pub mod types;
