//! Kernel-style error numbers reported by the control surface and backends.

pub const ENOENT: i32 = 2;
pub const EAGAIN: i32 = 11;
pub const ENOMEM: i32 = 12;
pub const EACCES: i32 = 13;
pub const EINVAL: i32 = 22;
pub const ERANGE: i32 = 34;
pub const ENOTSUPP: i32 = 524;
