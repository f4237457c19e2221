//! Memory-mapped reader: opens a container file, validates its header,
//! walks the section directory, and resolves image payloads on demand.

use std::fs::File;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use memmap2::Mmap;

use crate::decoder::ImageView;
use crate::error::{IronSegmentError, Result};
use crate::format::{
    Section, SectionHeader, HEADER_SIZE, MAGIC, SECTION_HEADER_SIZE, SECTION_KIND_END,
    SECTION_KIND_IMAGE, SECTION_KIND_MANIFEST, VERSION_MAJOR,
};
use crate::manifest::parse_manifest;
use crate::model::{ImageID, Manifest};

/// An open segmentation image container, backed by a read-only memory mapping.
///
/// The mapping and file handle are released together when the `Reader` is
/// dropped. Every `ImageView` produced by `image_data` borrows from the
/// mapping and cannot outlive this `Reader`.
pub struct Reader {
    mmap: Mmap,
    version_minor: u32,
    sections: Vec<Section>,
    manifest: Manifest,
}

impl Reader {
    /// Open `path`, validate its header, walk its section directory, and
    /// parse its manifest.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_mmap(mmap)
    }

    fn from_mmap(mmap: Mmap) -> Result<Self> {
        if mmap.len() < HEADER_SIZE as usize {
            return Err(IronSegmentError::FormatTruncated {
                offset: 0,
                detail: "file shorter than fixed header".to_string(),
            });
        }

        let magic = BigEndian::read_u64(&mmap[0..8]);
        if magic != MAGIC {
            return Err(IronSegmentError::FormatBadMagic {
                got: magic,
                expected: MAGIC,
            });
        }

        let version_major = BigEndian::read_u32(&mmap[8..12]);
        if version_major != VERSION_MAJOR {
            return Err(IronSegmentError::VersionUnsupported {
                got: version_major,
                expected: VERSION_MAJOR,
            });
        }
        let version_minor = BigEndian::read_u32(&mmap[12..16]);

        let sections = walk_sections(&mmap)?;

        let manifest_bytes = sections
            .iter()
            .find_map(|s| match s {
                Section::Manifest(header) => Some(*header),
                _ => None,
            })
            .ok_or(IronSegmentError::ManifestMissing)
            .and_then(|header| read_manifest_payload(&mmap, &header))?;

        let manifest = parse_manifest(manifest_bytes)?;

        Ok(Reader {
            mmap,
            version_minor,
            sections,
            manifest,
        })
    }

    /// `(major, minor)` version recorded in the file header.
    pub fn version(&self) -> (u32, u32) {
        (VERSION_MAJOR, self.version_minor)
    }

    /// All sections, in file order.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// The parsed manifest record.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// The first IMAGE section whose embedded identifier equals `id`.
    pub fn image_section(&self, id: ImageID) -> Result<&Section> {
        self.sections
            .iter()
            .find(|s| matches!(s, Section::Image { image_id, .. } if *image_id == id))
            .ok_or(IronSegmentError::NotFound(id.value()))
    }

    /// Construct a typed, zero-copy view over the pixel payload of image `id`.
    pub fn image_data(&self, id: ImageID) -> Result<ImageView<'_>> {
        let section = self.image_section(id)?;
        let header = section.header();

        let image = self
            .manifest
            .images
            .images
            .get(&id)
            .ok_or(IronSegmentError::NotFound(id.value()))?;

        let width = self.manifest.images.width;
        let height = self.manifest.images.height;
        let bpp = image.semantic.bytes_per_pixel() as u64;
        let pixel_len = width as u64 * height as u64 * bpp;

        let pixel_start = (header.payload_offset() + 4) as usize;
        let pixel_end = pixel_start + pixel_len as usize;
        if pixel_end > self.mmap.len() {
            return Err(IronSegmentError::FormatTruncated {
                offset: header.file_offset,
                detail: "IMAGE section too small for manifest's width/height/semantic"
                    .to_string(),
            });
        }
        let raw = &self.mmap[pixel_start..pixel_end];

        Ok(ImageView::new(image.semantic, width, height, raw))
    }
}

fn read_manifest_payload<'a>(mmap: &'a Mmap, header: &SectionHeader) -> Result<&'a [u8]> {
    let start = header.payload_offset() as usize;
    if start + 4 > mmap.len() {
        return Err(IronSegmentError::FormatTruncated {
            offset: header.file_offset,
            detail: "MANIFEST section too small for length prefix".to_string(),
        });
    }
    let len = BigEndian::read_u32(&mmap[start..start + 4]) as usize;
    let text_start = start + 4;
    let text_end = text_start + len;
    if text_end > mmap.len() {
        return Err(IronSegmentError::FormatTruncated {
            offset: header.file_offset,
            detail: "MANIFEST payload length exceeds file size".to_string(),
        });
    }
    Ok(&mmap[text_start..text_end])
}

fn walk_sections(mmap: &Mmap) -> Result<Vec<Section>> {
    let mut sections = Vec::new();
    let mut offset = HEADER_SIZE;

    loop {
        if offset + SECTION_HEADER_SIZE > mmap.len() as u64 {
            return Err(IronSegmentError::FormatTruncated {
                offset,
                detail: "section header runs past end of file".to_string(),
            });
        }

        let header_start = offset as usize;
        let kind = BigEndian::read_u64(&mmap[header_start..header_start + 8]);
        let size = BigEndian::read_u64(&mmap[header_start + 8..header_start + 16]);

        let header = SectionHeader {
            kind,
            size,
            file_offset: offset,
        };

        if header.end_offset() > mmap.len() as u64 {
            return Err(IronSegmentError::FormatTruncated {
                offset,
                detail: "section payload runs past end of file".to_string(),
            });
        }

        let section = match kind {
            SECTION_KIND_MANIFEST => Section::Manifest(header),
            SECTION_KIND_IMAGE => {
                let id_start = header.payload_offset() as usize;
                if id_start + 4 > mmap.len() {
                    return Err(IronSegmentError::FormatTruncated {
                        offset,
                        detail: "IMAGE section too small for id prefix".to_string(),
                    });
                }
                let raw_id = BigEndian::read_u32(&mmap[id_start..id_start + 4]);
                let image_id = ImageID::new(raw_id)?;
                Section::Image { header, image_id }
            }
            SECTION_KIND_END => {
                sections.push(Section::End(header));
                break;
            }
            _ => Section::Unknown(header),
        };
        sections.push(section);

        offset = header.end_offset();
    }

    if !sections
        .iter()
        .any(|s| matches!(s, Section::Manifest(_)))
    {
        return Err(IronSegmentError::ManifestMissing);
    }

    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Writer;
    use std::collections::BTreeMap;
    use crate::model::{Image, Images, PixelSemantic};
    use tempfile::NamedTempFile;

    fn three_image_manifest() -> Manifest {
        let mut images = BTreeMap::new();
        for (n, semantic) in [
            (1u32, PixelSemantic::DenoiseRgb8),
            (2, PixelSemantic::Depth16),
            (3, PixelSemantic::ObjectId32),
        ] {
            let id = ImageID::new(n).unwrap();
            images.insert(id, Image { id, semantic });
        }
        Manifest {
            images: Images {
                width: 4,
                height: 4,
                images,
            },
            objects: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn end_to_end_scenario_has_manifest_then_three_images_then_end() {
        let tmp = NamedTempFile::new().unwrap();
        let manifest = three_image_manifest();
        let writer = Writer::create(tmp.path(), &manifest).unwrap();
        let writable = writer.writable_images();
        assert_eq!(writable.len(), 3);
        // Each image's reserved region starts strictly after the previous
        // one's, since sections are laid out contiguously in ascending
        // ImageID order.
        assert!(writable[0].offset < writable[1].offset);
        assert!(writable[1].offset < writable[2].offset);
        drop(writer);

        let reader = Reader::open(tmp.path()).unwrap();
        assert_eq!(reader.version(), (1, 0));
        assert_eq!(reader.sections().len(), 5);
        let kinds: Vec<&str> = reader
            .sections()
            .iter()
            .map(|s| match s {
                Section::Manifest(_) => "MANIFEST",
                Section::Image { .. } => "IMAGE",
                Section::End(_) => "END",
                Section::Unknown(_) => "UNKNOWN",
            })
            .collect();
        assert_eq!(kinds, vec!["MANIFEST", "IMAGE", "IMAGE", "IMAGE", "END"]);
        if let Section::Image { image_id, .. } = &reader.sections()[1] {
            assert_eq!(image_id.value(), 1);
        } else {
            panic!("expected IMAGE section at index 1");
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        let tmp = NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), vec![0u8; 64]).unwrap();
        let err = Reader::open(tmp.path()).unwrap_err();
        assert!(matches!(err, IronSegmentError::FormatBadMagic { .. }));
    }

    #[test]
    fn image_data_reports_truncated_when_section_too_small_for_manifest_dimensions() {
        use crate::manifest::serialize_manifest;
        use std::io::Write;

        // Manifest claims a 100x100 RGB8 image (30000 pixel bytes), but the
        // IMAGE section on disk is framed with only enough room for the
        // 4-byte id prefix. Framing itself is internally consistent (every
        // section's declared `size` fits the file), so `walk_sections`
        // accepts it; only `image_data`'s cross-check against the manifest's
        // implied payload length should reject it.
        let mut images = BTreeMap::new();
        let id = ImageID::new(1).unwrap();
        images.insert(
            id,
            Image {
                id,
                semantic: PixelSemantic::DenoiseRgb8,
            },
        );
        let manifest = Manifest {
            images: Images {
                width: 100,
                height: 100,
                images,
            },
            objects: BTreeMap::new(),
            metadata: BTreeMap::new(),
        };
        let xml = serialize_manifest(&manifest).unwrap();
        let xml_bytes = xml.as_bytes();

        let manifest_payload_len = 4 + xml_bytes.len() as u64;
        let manifest_size = crate::format::align16(manifest_payload_len);
        let image_size: u64 = 16; // just the 4-byte id prefix, padded to 16

        let mut buf = Vec::new();
        let mut scratch = [0u8; 8];
        BigEndian::write_u64(&mut scratch, MAGIC);
        buf.extend_from_slice(&scratch);
        let mut scratch4 = [0u8; 4];
        BigEndian::write_u32(&mut scratch4, VERSION_MAJOR);
        buf.extend_from_slice(&scratch4);
        BigEndian::write_u32(&mut scratch4, 0);
        buf.extend_from_slice(&scratch4);

        BigEndian::write_u64(&mut scratch, SECTION_KIND_MANIFEST);
        buf.extend_from_slice(&scratch);
        BigEndian::write_u64(&mut scratch, manifest_size);
        buf.extend_from_slice(&scratch);
        BigEndian::write_u32(&mut scratch4, xml_bytes.len() as u32);
        buf.extend_from_slice(&scratch4);
        buf.extend_from_slice(xml_bytes);
        buf.resize(buf.len() + (manifest_size - manifest_payload_len) as usize, 0);

        BigEndian::write_u64(&mut scratch, SECTION_KIND_IMAGE);
        buf.extend_from_slice(&scratch);
        BigEndian::write_u64(&mut scratch, image_size);
        buf.extend_from_slice(&scratch);
        BigEndian::write_u32(&mut scratch4, id.value());
        buf.extend_from_slice(&scratch4);
        buf.resize(buf.len() + (image_size as usize - 4), 0);

        BigEndian::write_u64(&mut scratch, SECTION_KIND_END);
        buf.extend_from_slice(&scratch);
        BigEndian::write_u64(&mut scratch, 0);
        buf.extend_from_slice(&scratch);

        let tmp = NamedTempFile::new().unwrap();
        std::fs::File::create(tmp.path())
            .unwrap()
            .write_all(&buf)
            .unwrap();

        let reader = Reader::open(tmp.path()).unwrap();
        assert!(matches!(
            reader.image_data(id),
            Err(IronSegmentError::FormatTruncated { .. })
        ));
    }

    #[test]
    fn image_data_reports_not_found_for_unknown_id() {
        let tmp = NamedTempFile::new().unwrap();
        let manifest = three_image_manifest();
        let writer = Writer::create(tmp.path(), &manifest).unwrap();
        drop(writer);
        let reader = Reader::open(tmp.path()).unwrap();
        let missing = ImageID::new(99).unwrap();
        assert!(matches!(
            reader.image_data(missing),
            Err(IronSegmentError::NotFound(99))
        ));
    }
}
