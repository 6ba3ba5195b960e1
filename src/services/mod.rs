//! Service layer: drive orchestration and the storage-quota ledger.

pub mod drive_service;
pub mod quota;
