use crate::model::Ms;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

pub const MAX_TITLE_LEN: usize = 512;
pub const MAX_USER_ID_LEN: usize = 256;
pub const MAX_TIME_INPUT_LEN: usize = 64;
pub const MAX_RESERVATIONS_PER_USER: usize = 10_000;
