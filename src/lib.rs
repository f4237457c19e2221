//! ironsegment - segmentation image container format
//!
//! A library for reading and writing "segmentation image" container files:
//! a bundle of co-registered raster images (color, depth, object IDs,
//! monochrome line art) sharing a single width and height, accompanied by an
//! XML manifest describing their logical meanings and object metadata.
//!
//! Containers are designed for random-access reading via memory mapping: the
//! manifest is parsed once on open, then individual image payloads are
//! decoded lazily through a typed, zero-copy [`decoder::ImageView`].
//!
//! # Example
//!
//! ```no_run
//! use ironsegment::{Reader, model::ImageID};
//!
//! fn main() -> ironsegment::Result<()> {
//!     let reader = Reader::open("scene.isb")?;
//!     let id = ImageID::new(1)?;
//!     let view = reader.image_data(id)?;
//!     let rgb = view.get_rgb_float(0, 0)?;
//!     println!("{:?}", rgb);
//!     Ok(())
//! }
//! ```

pub mod decoder;
pub mod error;
pub mod format;
pub mod manifest;
pub mod model;
pub mod reader;
pub mod writer;

pub use decoder::ImageView;
pub use error::{IronSegmentError, Result};
pub use format::{Section, SectionHeader};
pub use manifest::{parse_manifest, serialize_manifest};
pub use model::{Image, ImageID, Images, Manifest, Object, ObjectID, PixelSemantic};
pub use reader::Reader;
pub use writer::{WritableImage, Writer};
