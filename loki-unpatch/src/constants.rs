pub const BOOT_MAGIC: &[u8] = b"ANDROID!";
pub const BOOT_MAGIC_SIZE: usize = 8;
pub const BOOT_NAME_SIZE: usize = 16;
pub const BOOT_ARGS_SIZE: usize = 512;
pub const BOOT_ID_SIZE: usize = 8 * size_of::<u32>();

pub const LOKI_MAGIC: &[u8] = b"LOKI";
pub const LOKI_MAGIC_SIZE: usize = 4;
pub const LOKI_BUILD_SIZE: usize = 128;

/// Offset of the loki header inside a patched image.
pub const LOKI_HEADER_OFFSET: usize = 0x400;
