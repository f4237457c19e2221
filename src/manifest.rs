//! Parsing and serialization of the manifest XML document.
//!
//! Schema namespace: `urn:com.io7m.ironsegment:manifest:1`. The document is
//! a `Manifest` root with three children, always in this order: `Images`,
//! `Objects`, `Metadata`.
//!
//! ```xml
//! <Manifest xmlns="urn:com.io7m.ironsegment:manifest:1">
//!   <Images Width="W" Height="H">
//!     <Image ID="i" Semantic="TAG"/>
//!   </Images>
//!   <Objects>
//!     <Object ID="j">description text</Object>
//!   </Objects>
//!   <Metadata>
//!     <Meta Name="k">value</Meta>
//!   </Metadata>
//! </Manifest>
//! ```

use std::collections::BTreeMap;
use std::io::Cursor;

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{IronSegmentError, Result};
use crate::model::{Image, ImageID, Images, Manifest, Object, ObjectID, PixelSemantic};

pub const NAMESPACE: &str = "urn:com.io7m.ironsegment:manifest:1";

fn invalid(detail: impl Into<String>) -> IronSegmentError {
    IronSegmentError::ManifestInvalid {
        detail: detail.into(),
    }
}

fn attr_value(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.as_ref() == name {
            Some(String::from_utf8_lossy(&a.value).to_string())
        } else {
            None
        }
    })
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum Section {
    None,
    Images,
    Objects,
    Metadata,
}

/// Enforces that `Images`, `Objects`, and `Metadata` each appear exactly
/// once, in that order, as direct children of `Manifest` — the structural
/// guarantee the original schema-validated parser gets for free from its XSD.
fn check_top_level_order(last: &mut u8, ordinal: u8, name: &str) -> Result<()> {
    if ordinal <= *last {
        return Err(invalid(format!(
            "{name} element out of order or duplicated (expected Images, Objects, Metadata, in that order, each once)"
        )));
    }
    *last = ordinal;
    Ok(())
}

/// Parse a manifest document from its serialized XML bytes.
pub fn parse_manifest(xml: &[u8]) -> Result<Manifest> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut width: Option<u32> = None;
    let mut height: Option<u32> = None;
    let mut images: BTreeMap<ImageID, Image> = BTreeMap::new();
    let mut objects: BTreeMap<ObjectID, Object> = BTreeMap::new();
    let mut metadata: BTreeMap<String, String> = BTreeMap::new();

    let mut section = Section::None;
    // Tracks which top-level child of <Manifest> has most recently been
    // opened: 0 = none yet, 1 = Images, 2 = Objects, 3 = Metadata. The
    // schema requires these in that exact order, each appearing once; this
    // mirrors the rejection the archived XSD-validated parser performs for
    // out-of-order, duplicated, or unrecognised top-level children.
    let mut last_top_level: u8 = 0;
    let mut current_object_id: Option<ObjectID> = None;
    let mut current_object_text = String::new();
    let mut current_meta_name: Option<String> = None;
    let mut current_meta_text = String::new();

    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| invalid(format!("XML syntax error: {e}")))?
        {
            Event::Start(ref e) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match tag.as_str() {
                    "Manifest" => {}
                    "Images" => {
                        check_top_level_order(&mut last_top_level, 1, "Images")?;
                        section = Section::Images;
                        width = Some(
                            attr_value(e, b"Width")
                                .ok_or_else(|| invalid("Images element missing Width attribute"))?
                                .parse()
                                .map_err(|_| invalid("Images Width attribute is not an integer"))?,
                        );
                        height = Some(
                            attr_value(e, b"Height")
                                .ok_or_else(|| invalid("Images element missing Height attribute"))?
                                .parse()
                                .map_err(|_| invalid("Images Height attribute is not an integer"))?,
                        );
                    }
                    "Objects" => {
                        check_top_level_order(&mut last_top_level, 2, "Objects")?;
                        section = Section::Objects;
                    }
                    "Metadata" => {
                        check_top_level_order(&mut last_top_level, 3, "Metadata")?;
                        section = Section::Metadata;
                    }
                    "Object" if section == Section::Objects => {
                        let id_raw: u32 = attr_value(e, b"ID")
                            .ok_or_else(|| invalid("Object element missing ID attribute"))?
                            .parse()
                            .map_err(|_| invalid("Object ID attribute is not an integer"))?;
                        current_object_id = Some(ObjectID::new(id_raw)?);
                        current_object_text.clear();
                    }
                    "Meta" if section == Section::Metadata => {
                        current_meta_name = Some(
                            attr_value(e, b"Name")
                                .ok_or_else(|| invalid("Meta element missing Name attribute"))?,
                        );
                        current_meta_text.clear();
                    }
                    _ if section == Section::None => {
                        return Err(invalid(format!(
                            "unexpected top-level element in manifest: {tag}"
                        )));
                    }
                    _ => {}
                }
            }
            Event::Empty(ref e) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match tag.as_str() {
                    "Images" => check_top_level_order(&mut last_top_level, 1, "Images")?,
                    "Objects" => check_top_level_order(&mut last_top_level, 2, "Objects")?,
                    "Metadata" => check_top_level_order(&mut last_top_level, 3, "Metadata")?,
                    "Image" if section == Section::Images => {
                        let id_raw: u32 = attr_value(e, b"ID")
                            .ok_or_else(|| invalid("Image element missing ID attribute"))?
                            .parse()
                            .map_err(|_| invalid("Image ID attribute is not an integer"))?;
                        let id = ImageID::new(id_raw)?;
                        let semantic_tag = attr_value(e, b"Semantic")
                            .ok_or_else(|| invalid("Image element missing Semantic attribute"))?;
                        let semantic = PixelSemantic::from_tag(&semantic_tag)
                            .ok_or_else(|| invalid(format!("unknown Semantic tag: {semantic_tag}")))?;
                        images.insert(id, Image { id, semantic });
                    }
                    "Object" if section == Section::Objects => {
                        let id_raw: u32 = attr_value(e, b"ID")
                            .ok_or_else(|| invalid("Object element missing ID attribute"))?
                            .parse()
                            .map_err(|_| invalid("Object ID attribute is not an integer"))?;
                        let id = ObjectID::new(id_raw)?;
                        objects.insert(
                            id,
                            Object {
                                id,
                                description: String::new(),
                            },
                        );
                    }
                    _ if section == Section::None => {
                        return Err(invalid(format!(
                            "unexpected top-level element in manifest: {tag}"
                        )));
                    }
                    _ => {}
                }
            }
            Event::Text(ref e) => {
                let text = e
                    .unescape()
                    .map_err(|e| invalid(format!("XML text error: {e}")))?
                    .to_string();
                if current_object_id.is_some() {
                    current_object_text.push_str(&text);
                } else if current_meta_name.is_some() {
                    current_meta_text.push_str(&text);
                }
            }
            Event::End(ref e) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match tag.as_str() {
                    "Object" if current_object_id.is_some() => {
                        let id = current_object_id.take().unwrap();
                        objects.insert(
                            id,
                            Object {
                                id,
                                description: std::mem::take(&mut current_object_text),
                            },
                        );
                    }
                    "Meta" if current_meta_name.is_some() => {
                        let name = current_meta_name.take().unwrap();
                        metadata.insert(name, std::mem::take(&mut current_meta_text));
                    }
                    "Images" | "Objects" | "Metadata" => section = Section::None,
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let width = width.ok_or_else(|| invalid("manifest has no Images element"))?;
    let height = height.unwrap_or(0);

    Ok(Manifest {
        images: Images {
            width,
            height,
            images,
        },
        objects,
        metadata,
    })
}

/// Serialize a manifest record to its XML document form.
///
/// Children are emitted in ascending `ImageID`/`ObjectID` order for `Images`
/// and `Objects`, and ascending key order for `Metadata` — `Manifest.images`,
/// `.objects`, and `.metadata` are `BTreeMap`s, so iteration is already in
/// that order.
pub fn serialize_manifest(manifest: &Manifest) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    let mut root = BytesStart::new("Manifest");
    root.push_attribute(("xmlns", NAMESPACE));
    writer
        .write_event(Event::Start(root))
        .map_err(|e| invalid(format!("XML write error: {e}")))?;

    let mut images_tag = BytesStart::new("Images");
    images_tag.push_attribute(("Width", manifest.images.width.to_string().as_str()));
    images_tag.push_attribute(("Height", manifest.images.height.to_string().as_str()));
    writer
        .write_event(Event::Start(images_tag))
        .map_err(|e| invalid(format!("XML write error: {e}")))?;
    for image in manifest.images.images.values() {
        let mut tag = BytesStart::new("Image");
        tag.push_attribute(("ID", image.id.value().to_string().as_str()));
        tag.push_attribute(("Semantic", image.semantic.tag()));
        writer
            .write_event(Event::Empty(tag))
            .map_err(|e| invalid(format!("XML write error: {e}")))?;
    }
    writer
        .write_event(Event::End(quick_xml::events::BytesEnd::new("Images")))
        .map_err(|e| invalid(format!("XML write error: {e}")))?;

    writer
        .write_event(Event::Start(BytesStart::new("Objects")))
        .map_err(|e| invalid(format!("XML write error: {e}")))?;
    for object in manifest.objects.values() {
        let mut tag = BytesStart::new("Object");
        tag.push_attribute(("ID", object.id.value().to_string().as_str()));
        writer
            .write_event(Event::Start(tag))
            .map_err(|e| invalid(format!("XML write error: {e}")))?;
        writer
            .write_event(Event::Text(BytesText::new(&object.description)))
            .map_err(|e| invalid(format!("XML write error: {e}")))?;
        writer
            .write_event(Event::End(quick_xml::events::BytesEnd::new("Object")))
            .map_err(|e| invalid(format!("XML write error: {e}")))?;
    }
    writer
        .write_event(Event::End(quick_xml::events::BytesEnd::new("Objects")))
        .map_err(|e| invalid(format!("XML write error: {e}")))?;

    writer
        .write_event(Event::Start(BytesStart::new("Metadata")))
        .map_err(|e| invalid(format!("XML write error: {e}")))?;
    for (name, value) in manifest.metadata.iter() {
        let mut tag = BytesStart::new("Meta");
        tag.push_attribute(("Name", name.as_str()));
        writer
            .write_event(Event::Start(tag))
            .map_err(|e| invalid(format!("XML write error: {e}")))?;
        writer
            .write_event(Event::Text(BytesText::new(value)))
            .map_err(|e| invalid(format!("XML write error: {e}")))?;
        writer
            .write_event(Event::End(quick_xml::events::BytesEnd::new("Meta")))
            .map_err(|e| invalid(format!("XML write error: {e}")))?;
    }
    writer
        .write_event(Event::End(quick_xml::events::BytesEnd::new("Metadata")))
        .map_err(|e| invalid(format!("XML write error: {e}")))?;

    writer
        .write_event(Event::End(quick_xml::events::BytesEnd::new("Manifest")))
        .map_err(|e| invalid(format!("XML write error: {e}")))?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| invalid(format!("serialized non-UTF-8 XML: {e}")))
}
