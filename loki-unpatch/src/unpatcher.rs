use crate::error::{Error, Result, Segment};
use crate::parser::{BootHeader, ImageClass, LokiHeader, MarkerClass};
use crate::utils::align_to;
use std::io::Write;
use std::ops::Range;
use tracing::{trace, warn};

/// How the ramdisk load address of the rebuilt header is derived.
///
/// The default, `Relative { base: 0 }`, stores the ramdisk's offset inside
/// the image file rather than a device load address. Pass the device's load
/// base to get a usable address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RamdiskAddress {
    /// `base + page_size + aligned kernel size`.
    Relative { base: u32 },
    /// Keep whatever the patched header carries.
    Preserve,
}

impl Default for RamdiskAddress {
    fn default() -> Self {
        RamdiskAddress::Relative { base: 0 }
    }
}

#[derive(Debug, Default, Copy, Clone)]
pub struct UnpatchOptions {
    pub ramdisk_addr: RamdiskAddress,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReconstructionPlan {
    pub page_size: u32,
    pub original_kernel_size: u32,
    pub original_ramdisk_size: u32,
    pub aligned_kernel_size: u32,
    pub aligned_ramdisk_size: u32,
}

impl ReconstructionPlan {
    // Computed in u64 so the sums cannot overflow on 32-bit hosts.
    fn span(&self, segment: Segment) -> Range<u64> {
        let page = self.page_size as u64;
        let kernel = self.aligned_kernel_size as u64;
        let ramdisk = self.aligned_ramdisk_size as u64;
        match segment {
            Segment::Header => 0..page,
            Segment::Kernel => page..page + kernel,
            Segment::Ramdisk => page + kernel..page + kernel + ramdisk,
        }
    }

    // Only exact once check_bounds has passed; saturates otherwise.
    fn range(&self, segment: Segment) -> Range<usize> {
        let span = self.span(segment);
        let to_usize = |n: u64| usize::try_from(n).unwrap_or(usize::MAX);
        to_usize(span.start)..to_usize(span.end)
    }

    pub fn header_range(&self) -> Range<usize> {
        self.range(Segment::Header)
    }

    pub fn kernel_range(&self) -> Range<usize> {
        self.range(Segment::Kernel)
    }

    pub fn ramdisk_range(&self) -> Range<usize> {
        self.range(Segment::Ramdisk)
    }

    pub fn output_len(&self) -> u64 {
        self.span(Segment::Ramdisk).end
    }

    /// Fails if any planned segment reaches past `len` bytes of input.
    pub fn check_bounds(&self, len: usize) -> Result<()> {
        for segment in [Segment::Header, Segment::Kernel, Segment::Ramdisk] {
            let span = self.span(segment);
            if span.end > len as u64 {
                return Err(Error::SegmentOutOfBounds {
                    segment,
                    offset: span.start,
                    size: span.end - span.start,
                    len,
                });
            }
        }
        Ok(())
    }
}

/// Checks that `data` carries the loki marker at 0x400.
pub fn validate(data: &[u8]) -> Result<LokiHeader<'_>> {
    LokiHeader::parse(data)
}

/// Recovers the original sizes from the side-channel header slots and builds
/// the header to emit in place of the patched one.
pub fn recover_plan(
    header: &BootHeader,
    options: &UnpatchOptions,
) -> Result<(ReconstructionPlan, BootHeader)> {
    let page_size = header.page_size;
    let original_kernel_size = header.recovered_kernel_size;
    let original_ramdisk_size = header.recovered_ramdisk_size;

    if !page_size.is_power_of_two() || (page_size as usize) < BootHeader::SIZE {
        return Err(Error::InvalidPageSize(page_size));
    }
    let aligned_kernel_size = align_to(original_kernel_size, page_size)
        .ok_or(Error::SizeOverflow(Segment::Kernel, original_kernel_size))?;
    let aligned_ramdisk_size = align_to(original_ramdisk_size, page_size)
        .ok_or(Error::SizeOverflow(Segment::Ramdisk, original_ramdisk_size))?;

    let plan = ReconstructionPlan {
        page_size,
        original_kernel_size,
        original_ramdisk_size,
        aligned_kernel_size,
        aligned_ramdisk_size,
    };

    let mut original = header.clone();
    original.kernel_size = aligned_kernel_size;
    original.ramdisk_size = aligned_ramdisk_size;
    if let RamdiskAddress::Relative { base } = options.ramdisk_addr {
        original.ramdisk_addr = base
            .wrapping_add(page_size)
            .wrapping_add(aligned_kernel_size);
    }
    original.recovered_kernel_size = 0;
    original.recovered_ramdisk_size = 0;

    Ok((plan, original))
}

/// Writes header page, kernel and ramdisk to `sink`, in that order.
pub fn emit(
    data: &[u8],
    header: &BootHeader,
    plan: &ReconstructionPlan,
    sink: &mut dyn Write,
) -> Result<()> {
    plan.check_bounds(data.len())?;

    let mut header_page = data[plan.header_range()].to_vec();
    header.encode_into(&mut header_page)?;

    write_segment(sink, Segment::Header, &header_page)?;
    write_segment(sink, Segment::Kernel, &data[plan.kernel_range()])?;
    write_segment(sink, Segment::Ramdisk, &data[plan.ramdisk_range()])?;
    sink.flush().map_err(|e| Error::Write(Segment::Ramdisk, e))?;
    Ok(())
}

fn write_segment(sink: &mut dyn Write, segment: Segment, data: &[u8]) -> Result<()> {
    trace!("writing {} segment, {} bytes", segment, data.len());
    sink.write_all(data).map_err(|e| Error::Write(segment, e))
}

/// Runs the whole pipeline on a mapped loki image. Nothing is written to
/// `sink` unless the marker, header and segment bounds all check out.
pub fn unpatch(
    data: &[u8],
    declared: ImageClass,
    options: &UnpatchOptions,
    sink: &mut dyn Write,
) -> Result<ReconstructionPlan> {
    let (plan, header) = prepare(data, declared, options)?;
    emit(data, &header, &plan, sink)?;
    Ok(plan)
}

/// The read-only half of [`unpatch`]: validate, parse and plan, including
/// the bounds check against `data`.
pub fn prepare(
    data: &[u8],
    declared: ImageClass,
    options: &UnpatchOptions,
) -> Result<(ReconstructionPlan, BootHeader)> {
    let loki = validate(data)?;
    match loki.image_class() {
        MarkerClass::Unknown(n) => warn!("marker records unknown image class {}", n),
        class if !class.matches(declared) => {
            warn!("unpatching as {} but marker records {:?}", declared, class)
        }
        _ => {}
    }
    if declared == ImageClass::Recovery {
        warn!("recovery images are not well tested, review the output before flashing");
    }

    let header = BootHeader::parse(data)?;
    if !header.has_boot_magic() {
        warn!("missing ANDROID! magic in primary header");
    }

    let (plan, original) = recover_plan(&header, options)?;
    original.log_fields();
    plan.check_bounds(data.len())?;
    Ok((plan, original))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::layouts::RawBootHeader;
    use std::io;

    const PAGE_SIZE: u32 = 2048;

    fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
        buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn u32_at(buf: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
    }

    // Header page + 6144 kernel bytes of 0xAA + 4096 ramdisk bytes of 0xBB.
    fn patched_image() -> Vec<u8> {
        let mut data = vec![0u8; PAGE_SIZE as usize];
        data[..8].copy_from_slice(b"ANDROID!");
        put_u32(&mut data, 8, 5000);
        put_u32(&mut data, 12, 0x1000_8000);
        put_u32(&mut data, 16, 3000);
        put_u32(&mut data, 20, 0x1100_0000);
        put_u32(&mut data, 36, PAGE_SIZE);
        put_u32(&mut data, 40, 5000);
        put_u32(&mut data, 44, 3000);
        data[48..54].copy_from_slice(b"device");
        data[64..78].copy_from_slice(b"console=ttyS0 ");
        data[0x400..0x404].copy_from_slice(b"LOKI");
        data.extend(std::iter::repeat_n(0xAA, 6144));
        data.extend(std::iter::repeat_n(0xBB, 4096));
        data
    }

    fn run(data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        unpatch(data, ImageClass::Boot, &UnpatchOptions::default(), &mut out)?;
        Ok(out)
    }

    #[test]
    fn reconstructs_original_layout() {
        let data = patched_image();
        let out = run(&data).unwrap();

        assert_eq!(out.len(), 2048 + 6144 + 4096);
        assert_eq!(u32_at(&out, 8), 6144);
        assert_eq!(u32_at(&out, 16), 4096);
        assert_eq!(u32_at(&out, 40), 0);
        assert_eq!(u32_at(&out, 44), 0);
        assert!(out[2048..8192].iter().all(|&b| b == 0xAA));
        assert!(out[8192..12288].iter().all(|&b| b == 0xBB));
    }

    #[test]
    fn passthrough_fields_survive() {
        let data = patched_image();
        let out = run(&data).unwrap();

        assert_eq!(&out[..8], b"ANDROID!");
        assert_eq!(u32_at(&out, 12), 0x1000_8000);
        assert_eq!(u32_at(&out, 36), PAGE_SIZE);
        assert_eq!(&out[48..64], &data[48..64]);
        assert_eq!(&out[64..576], &data[64..576]);
        // rest of the header page comes straight from the input
        assert_eq!(&out[RawBootHeader::SIZE..2048], &data[RawBootHeader::SIZE..2048]);
    }

    #[test]
    fn marker_must_match_exactly() {
        let data = patched_image();
        for byte in 0x400..0x404 {
            for bit in 0..8 {
                let mut data = data.clone();
                data[byte] ^= 1 << bit;
                assert!(matches!(validate(&data), Err(Error::NotPatchedImage)));
            }
        }
    }

    #[test]
    fn marker_fields_beyond_magic_are_ignored() {
        let mut data = patched_image();
        put_u32(&mut data, 0x404, 7);
        data[0x408..0x488].fill(b'x');
        let loki = validate(&data).unwrap();
        assert_eq!(loki.image_class(), MarkerClass::Unknown(7));
        assert_eq!(loki.build().len(), 128);
    }

    #[test]
    fn wrong_marker_writes_nothing() {
        let mut data = patched_image();
        data[0x400..0x404].copy_from_slice(b"NOPE");
        let mut out = Vec::new();
        let err = unpatch(&data, ImageClass::Boot, &UnpatchOptions::default(), &mut out)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotPatchedImage);
        assert!(out.is_empty());
    }

    #[test]
    fn short_input_fails_validation() {
        let data = patched_image();
        for len in [0, 0x400, 0x403, 0x400 + 135] {
            assert!(matches!(validate(&data[..len]), Err(Error::NotPatchedImage)));
        }
        assert!(validate(&data[..0x400 + 136]).is_ok());
    }

    #[test]
    fn plan_rounds_sizes_up() {
        let header = BootHeader::parse(&patched_image()).unwrap();
        let (plan, original) = recover_plan(&header, &UnpatchOptions::default()).unwrap();

        assert_eq!(plan.original_kernel_size, 5000);
        assert_eq!(plan.original_ramdisk_size, 3000);
        assert_eq!(plan.aligned_kernel_size, 6144);
        assert_eq!(plan.aligned_ramdisk_size, 4096);
        assert_eq!(plan.kernel_range(), 2048..8192);
        assert_eq!(plan.ramdisk_range(), 8192..12288);
        assert_eq!(plan.output_len(), 12288);

        assert_eq!(original.kernel_size, 6144);
        assert_eq!(original.ramdisk_size, 4096);
        assert_eq!(original.ramdisk_addr, 2048 + 6144);
        assert_eq!(original.recovered_kernel_size, 0);
        assert_eq!(original.recovered_ramdisk_size, 0);
        assert_eq!(original.kernel_addr, header.kernel_addr);
        assert_eq!(original.tags_addr, header.tags_addr);
    }

    #[test]
    fn ramdisk_addr_options() {
        let header = BootHeader::parse(&patched_image()).unwrap();

        let options = UnpatchOptions {
            ramdisk_addr: RamdiskAddress::Relative { base: 0x1000_0000 },
        };
        let (_, original) = recover_plan(&header, &options).unwrap();
        assert_eq!(original.ramdisk_addr, 0x1000_0000 + 2048 + 6144);

        let options = UnpatchOptions {
            ramdisk_addr: RamdiskAddress::Preserve,
        };
        let (_, original) = recover_plan(&header, &options).unwrap();
        assert_eq!(original.ramdisk_addr, 0x1100_0000);
    }

    #[test]
    fn aligned_sizes_kept() {
        let mut data = patched_image();
        put_u32(&mut data, 40, 4096);
        put_u32(&mut data, 44, 2048);
        let header = BootHeader::parse(&data).unwrap();
        let (plan, _) = recover_plan(&header, &UnpatchOptions::default()).unwrap();
        assert_eq!(plan.aligned_kernel_size, 4096);
        assert_eq!(plan.aligned_ramdisk_size, 2048);
    }

    #[test]
    fn bad_page_size_is_corrupt() {
        for page_size in [0, 3000, 512] {
            let mut data = patched_image();
            put_u32(&mut data, 36, page_size);
            let err = run(&data).unwrap_err();
            assert!(matches!(err, Error::InvalidPageSize(p) if p == page_size));
            assert_eq!(err.kind(), ErrorKind::CorruptImage);
        }
    }

    #[test]
    fn oversized_segments_are_corrupt() {
        let mut data = patched_image();
        put_u32(&mut data, 44, 3000 + 4096);
        let mut out = Vec::new();
        let err = unpatch(&data, ImageClass::Boot, &UnpatchOptions::default(), &mut out)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::SegmentOutOfBounds {
                segment: Segment::Ramdisk,
                offset: 8192,
                size: 8192,
                len: 12288,
            }
        ));
        assert!(out.is_empty());

        put_u32(&mut data, 40, u32::MAX);
        assert!(matches!(
            run(&data),
            Err(Error::SizeOverflow(Segment::Kernel, u32::MAX))
        ));
    }

    #[test]
    fn huge_plans_fail_bounds_without_wrapping() {
        let plan = ReconstructionPlan {
            page_size: 0x8000_0000,
            original_kernel_size: 0x8000_0000,
            original_ramdisk_size: 0x8000_0000,
            aligned_kernel_size: 0x8000_0000,
            aligned_ramdisk_size: 0x8000_0000,
        };
        assert_eq!(plan.output_len(), 0x1_8000_0000);

        let err = plan.check_bounds(0x9000_0000).unwrap_err();
        assert!(matches!(
            err,
            Error::SegmentOutOfBounds {
                segment: Segment::Kernel,
                offset: 0x8000_0000,
                size: 0x8000_0000,
                len: 0x9000_0000,
            }
        ));
    }

    #[test]
    fn emit_checks_bounds_itself() {
        let data = patched_image();
        let header = BootHeader::parse(&data).unwrap();
        let (plan, original) = recover_plan(&header, &UnpatchOptions::default()).unwrap();
        let mut out = Vec::new();
        let err = emit(&data[..9000], &original, &plan, &mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptImage);
        assert!(out.is_empty());
    }

    struct ShortWriter {
        remaining: usize,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Ok(0);
            }
            let n = buf.len().min(self.remaining);
            self.remaining -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn short_write_names_segment() {
        let data = patched_image();
        let cases = [
            (100, Segment::Header),
            (2048 + 10, Segment::Kernel),
            (8192 + 10, Segment::Ramdisk),
        ];
        for (remaining, expected) in cases {
            let mut sink = ShortWriter { remaining };
            let err = unpatch(&data, ImageClass::Boot, &UnpatchOptions::default(), &mut sink)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::IoWriteError);
            assert!(matches!(err, Error::Write(segment, _) if segment == expected));
        }
    }

    #[test]
    fn declared_class_does_not_change_output() {
        let data = patched_image();
        let mut boot = Vec::new();
        let mut recovery = Vec::new();
        unpatch(&data, ImageClass::Boot, &UnpatchOptions::default(), &mut boot).unwrap();
        unpatch(&data, ImageClass::Recovery, &UnpatchOptions::default(), &mut recovery).unwrap();
        assert_eq!(boot, recovery);
    }

    #[test]
    fn image_class_parsing_is_case_sensitive() {
        assert_eq!("boot".parse::<ImageClass>(), Ok(ImageClass::Boot));
        assert_eq!("recovery".parse::<ImageClass>(), Ok(ImageClass::Recovery));
        assert!("Boot".parse::<ImageClass>().is_err());
        assert!("bootloader".parse::<ImageClass>().is_err());
    }
}
