use paste::paste;

use crate::constants::{
    BOOT_ARGS_SIZE, BOOT_ID_SIZE, BOOT_MAGIC_SIZE, BOOT_NAME_SIZE, LOKI_BUILD_SIZE,
    LOKI_MAGIC_SIZE,
};

macro_rules! struct_item_size {
    (u32) => {
        4
    };
    ($sz:expr) => {
        $sz
    };
}

macro_rules! struct_item_maybe_def_size {
    ($name:ident u32) => {};
    ($name:ident $sz:expr) => {
        paste! {
            pub(super) const [<size_ $name>]: usize = $sz;
        }
    };
}

macro_rules! define_layout_offsets {
    ($name:ident $t:tt $(,)?) => {
        paste! {
            struct_item_maybe_def_size! { $name $t }
            pub(super) const total_size: usize = [<offset_ $name>] + struct_item_size! { $t };
        }
    };
    ($name1:ident $t1:tt, $name2:ident $t2:tt $(,)?) => {
        paste! {
            struct_item_maybe_def_size! { $name1 $t1 }
            pub(super) const [<offset_ $name2>]: usize = [<offset_ $name1>] + struct_item_size! { $t1 };
            struct_item_maybe_def_size! { $name2 $t2 }
            pub(super) const total_size: usize = [<offset_ $name2>] + struct_item_size! { $t2 };
        }
    };
    ($name1:ident $t1:tt, $name2:ident $t2:tt $(,$name:ident $t:tt)+ $(,)?) => {
        paste! {
            struct_item_maybe_def_size! { $name1 $t1 }
            pub(super) const [<offset_ $name2>]: usize = [<offset_ $name1>] + struct_item_size! { $t1 };
            define_layout_offsets! { $name2 $t2, $($name $t),+ }
        }
    };
}

macro_rules! define_layout {
    (
        $struct_name:ident,
        structure {$name1:ident $t1:tt $(,$name:ident $t:tt)* $(,)?} $(,)?
    ) => {
        paste! {
            #[allow(dead_code, non_upper_case_globals, nonstandard_style, unused)]
            mod [<mod_offsets_ $struct_name>] {
                use super::*;
                pub(super) const [<offset_ $name1>]: usize = 0;
                define_layout_offsets!{$name1 $t1, $($name $t),*}
            }
        }
    };
}

macro_rules! impl_ifield_accessor {
    ($vis:vis, $mod_name:ident, $name:ident $(,$suffix:ident)?) => {
        paste! {
            #[allow(unused)]
            $vis fn [<get_ $name $($suffix)?>](&self) -> u32 {
                let offset = [<mod_offsets_ $mod_name>]::[<offset_ $name>];
                u32::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap())
            }
        }
    };
}

macro_rules! impl_ifield_setter {
    ($vis:vis, $mod_name:ident, $name:ident) => {
        paste! {
            #[allow(unused)]
            $vis fn [<set_ $name>](&mut self, value: u32) {
                let offset = [<mod_offsets_ $mod_name>]::[<offset_ $name>];
                self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
            }
        }
    };
}

macro_rules! impl_sfield_accessor {
    ($vis:vis, $mod_name:ident, $name:ident) => {
        paste! {
            #[allow(unused)]
            $vis fn [<get_ $name>](&self) -> &'a [u8] {
                let offset = [<mod_offsets_ $mod_name>]::[<offset_ $name>];
                let sz = [<mod_offsets_ $mod_name>]::[<size_ $name>];
                let data: &'a [u8] = self.data;
                &data[offset..offset + sz]
            }
        }
    };
}

// Pre-v1 boot image header as written by mkbootimg of the loki era. The
// dt_size and unused slots are where loki_patch hides the original sizes.
define_layout! {
    BootHeaderLayout,
    structure {
        magic BOOT_MAGIC_SIZE,
        kernel_size u32,
        kernel_addr u32,
        ramdisk_size u32,
        ramdisk_addr u32,
        second_size u32,
        second_addr u32,
        tags_addr u32,
        page_size u32,
        dt_size u32,
        unused u32,
        name BOOT_NAME_SIZE,
        cmdline BOOT_ARGS_SIZE,
        id BOOT_ID_SIZE,
    },
}

define_layout! {
    LokiHeaderLayout,
    structure {
        magic LOKI_MAGIC_SIZE,
        recovery u32,
        build LOKI_BUILD_SIZE,
    },
}

/// Borrowed view of the primary header bytes. `data` always holds at least
/// [`RawBootHeader::SIZE`] bytes.
#[derive(Copy, Clone)]
pub struct RawBootHeader<'a> {
    pub(crate) data: &'a [u8],
}

impl<'a> RawBootHeader<'a> {
    impl_sfield_accessor! { pub, BootHeaderLayout, magic }
    impl_ifield_accessor! { pub, BootHeaderLayout, kernel_size }
    impl_ifield_accessor! { pub, BootHeaderLayout, kernel_addr }
    impl_ifield_accessor! { pub, BootHeaderLayout, ramdisk_size }
    impl_ifield_accessor! { pub, BootHeaderLayout, ramdisk_addr }
    impl_ifield_accessor! { pub, BootHeaderLayout, second_size }
    impl_ifield_accessor! { pub, BootHeaderLayout, second_addr }
    impl_ifield_accessor! { pub, BootHeaderLayout, tags_addr }
    impl_ifield_accessor! { pub, BootHeaderLayout, page_size }
    impl_ifield_accessor! { pub, BootHeaderLayout, dt_size }
    impl_ifield_accessor! { pub, BootHeaderLayout, unused }
    impl_sfield_accessor! { pub, BootHeaderLayout, name }
    impl_sfield_accessor! { pub, BootHeaderLayout, cmdline }
    impl_sfield_accessor! { pub, BootHeaderLayout, id }

    pub const SIZE: usize = mod_offsets_BootHeaderLayout::total_size;

    pub fn new(data: &'a [u8]) -> Option<Self> {
        data.get(..Self::SIZE).map(|data| Self { data })
    }
}

/// Mutable view used to re-encode a header in place.
pub struct RawBootHeaderMut<'a> {
    pub(crate) data: &'a mut [u8],
}

impl<'a> RawBootHeaderMut<'a> {
    impl_ifield_setter! { pub, BootHeaderLayout, kernel_size }
    impl_ifield_setter! { pub, BootHeaderLayout, kernel_addr }
    impl_ifield_setter! { pub, BootHeaderLayout, ramdisk_size }
    impl_ifield_setter! { pub, BootHeaderLayout, ramdisk_addr }
    impl_ifield_setter! { pub, BootHeaderLayout, second_size }
    impl_ifield_setter! { pub, BootHeaderLayout, second_addr }
    impl_ifield_setter! { pub, BootHeaderLayout, tags_addr }
    impl_ifield_setter! { pub, BootHeaderLayout, page_size }
    impl_ifield_setter! { pub, BootHeaderLayout, dt_size }
    impl_ifield_setter! { pub, BootHeaderLayout, unused }

    pub fn new(data: &'a mut [u8]) -> Option<Self> {
        data.get_mut(..RawBootHeader::SIZE).map(|data| Self { data })
    }

    pub fn set_magic(&mut self, magic: &[u8]) {
        let offset = mod_offsets_BootHeaderLayout::offset_magic;
        self.data[offset..offset + mod_offsets_BootHeaderLayout::size_magic].copy_from_slice(magic);
    }

    pub fn set_name(&mut self, name: &[u8]) {
        let offset = mod_offsets_BootHeaderLayout::offset_name;
        self.data[offset..offset + mod_offsets_BootHeaderLayout::size_name].copy_from_slice(name);
    }

    pub fn set_cmdline(&mut self, cmdline: &[u8]) {
        let offset = mod_offsets_BootHeaderLayout::offset_cmdline;
        self.data[offset..offset + mod_offsets_BootHeaderLayout::size_cmdline]
            .copy_from_slice(cmdline);
    }

    pub fn set_id(&mut self, id: &[u8]) {
        let offset = mod_offsets_BootHeaderLayout::offset_id;
        self.data[offset..offset + mod_offsets_BootHeaderLayout::size_id].copy_from_slice(id);
    }
}

/// Borrowed view of the loki marker header.
#[derive(Copy, Clone)]
pub struct RawLokiHeader<'a> {
    pub(crate) data: &'a [u8],
}

impl<'a> RawLokiHeader<'a> {
    impl_sfield_accessor! { pub, LokiHeaderLayout, magic }
    impl_ifield_accessor! { pub, LokiHeaderLayout, recovery, _raw }
    impl_sfield_accessor! { pub, LokiHeaderLayout, build }

    pub const SIZE: usize = mod_offsets_LokiHeaderLayout::total_size;

    pub fn new(data: &'a [u8]) -> Option<Self> {
        data.get(..Self::SIZE).map(|data| Self { data })
    }
}
