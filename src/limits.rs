/// Requests accepted by one `make_allocations` call.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Tables a catalog may hold.
pub const MAX_RESOURCES: usize = 1024;

/// Byte length of a table id.
pub const MAX_RESOURCE_ID_LEN: usize = 64;

/// Upper bound for a configured retry cap.
pub const MAX_ATTEMPTS: u32 = 16;
