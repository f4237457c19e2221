//! Memory-mapped writer: creates a container file, lays out its section
//! directory, and hands back writable pixel regions for the caller to fill.

use std::fs::OpenOptions;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use memmap2::{MmapMut, MmapOptions};

use crate::error::Result;
use crate::format::{
    align16, HEADER_SIZE, MAGIC, SECTION_HEADER_SIZE, SECTION_KIND_END, SECTION_KIND_IMAGE,
    SECTION_KIND_MANIFEST, VERSION_MAJOR,
};
use crate::manifest::serialize_manifest;
use crate::model::{Manifest, PixelSemantic};

/// A writable region reserved for one image's pixel payload.
///
/// `offset` points at the first pixel byte (past the 4-byte image id prefix
/// the writer has already filled in); `size` is exactly
/// `width * height * bytes_per_pixel(semantic)`, not the aligned section size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritableImage {
    pub semantic: PixelSemantic,
    pub offset: u64,
    pub size: u64,
}

/// Creates a new container file and lays out its section directory.
///
/// After `create` returns, the manifest section and every IMAGE section
/// header are fully written; image pixel regions are zero-initialized and
/// ready for the caller to fill via the mapping reachable through
/// [`Writer::writable_images`].
pub struct Writer {
    mmap: MmapMut,
    writable_images: Vec<WritableImage>,
}

impl Writer {
    /// Create `path` (truncating any existing file), write the header,
    /// manifest section, one IMAGE section per entry in
    /// `manifest.images.images` (ascending `ImageID` order), and the
    /// terminal END section.
    pub fn create<P: AsRef<Path>>(path: P, manifest: &Manifest) -> Result<Self> {
        let xml = serialize_manifest(manifest)?;
        let xml_bytes = xml.as_bytes();

        let manifest_payload_len = 4 + xml_bytes.len() as u64;
        let manifest_size = align16(manifest_payload_len);

        let mut image_sizes = Vec::new();
        for image in manifest.images.images.values() {
            let pixel_len = manifest.images.width as u64
                * manifest.images.height as u64
                * image.semantic.bytes_per_pixel() as u64;
            let payload_len = 4 + pixel_len;
            image_sizes.push((image.semantic, pixel_len, align16(payload_len)));
        }

        let total_len = HEADER_SIZE
            + SECTION_HEADER_SIZE
            + manifest_size
            + image_sizes
                .iter()
                .map(|(_, _, aligned)| SECTION_HEADER_SIZE + aligned)
                .sum::<u64>()
            + SECTION_HEADER_SIZE; // END section, size 0

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(total_len)?;

        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        BigEndian::write_u64(&mut mmap[0..8], MAGIC);
        BigEndian::write_u32(&mut mmap[8..12], VERSION_MAJOR);
        BigEndian::write_u32(&mut mmap[12..16], 0);

        let mut offset = HEADER_SIZE;

        write_section_header(&mut mmap, offset, SECTION_KIND_MANIFEST, manifest_size);
        let manifest_payload_start = (offset + SECTION_HEADER_SIZE) as usize;
        BigEndian::write_u32(
            &mut mmap[manifest_payload_start..manifest_payload_start + 4],
            xml_bytes.len() as u32,
        );
        let text_start = manifest_payload_start + 4;
        mmap[text_start..text_start + xml_bytes.len()].copy_from_slice(xml_bytes);
        offset += SECTION_HEADER_SIZE + manifest_size;

        let mut writable_images = Vec::new();
        for (image, (semantic, pixel_len, aligned_size)) in
            manifest.images.images.values().zip(image_sizes.iter())
        {
            write_section_header(&mut mmap, offset, SECTION_KIND_IMAGE, *aligned_size);
            let payload_start = (offset + SECTION_HEADER_SIZE) as usize;
            BigEndian::write_u32(
                &mut mmap[payload_start..payload_start + 4],
                image.id.value(),
            );
            let pixel_start = offset + SECTION_HEADER_SIZE + 4;
            writable_images.push(WritableImage {
                semantic: *semantic,
                offset: pixel_start,
                size: *pixel_len,
            });
            offset += SECTION_HEADER_SIZE + aligned_size;
        }

        write_section_header(&mut mmap, offset, SECTION_KIND_END, 0);

        mmap.flush()?;

        Ok(Writer {
            mmap,
            writable_images,
        })
    }

    /// The reserved pixel regions, one per image, in the same ascending
    /// `ImageID` order they were written to the file.
    pub fn writable_images(&self) -> &[WritableImage] {
        &self.writable_images
    }

    /// Mutable access to the full mapping, for filling in pixel payloads at
    /// the offsets reported by `writable_images`.
    pub fn mapping_mut(&mut self) -> &mut [u8] {
        &mut self.mmap[..]
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }
}

fn write_section_header(mmap: &mut MmapMut, offset: u64, kind: u64, size: u64) {
    let start = offset as usize;
    BigEndian::write_u64(&mut mmap[start..start + 8], kind);
    BigEndian::write_u64(&mut mmap[start + 8..start + 16], size);
}
