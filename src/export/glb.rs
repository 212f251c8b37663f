//! Binary glTF export
//!
//! Packs a [`RawObject`] into a single `.glb` file: one buffer holding
//! positions, normals, uvs and indices, plus the PNG-encoded base-color
//! texture wired through material → texture → image. Geometry and texture
//! presence is validated before any bytes are written.

use std::borrow::Cow;
use std::io::Cursor;
use std::path::Path;

use gltf::json;
use json::validation::Checked::Valid;
use json::validation::USize64;
use tracing::info;

use crate::engine::{RawObject, TextureImage};
use crate::error::GenerationError;

/// Reject silently-empty exports before encoding anything.
pub fn validate(object: &RawObject) -> Result<(), GenerationError> {
    if object.positions.is_empty() {
        return Err(GenerationError::ExportValidation(
            "mesh has no vertices".to_string(),
        ));
    }
    if object.indices.is_empty() || object.indices.len() % 3 != 0 {
        return Err(GenerationError::ExportValidation(format!(
            "mesh has invalid index count {}",
            object.indices.len()
        )));
    }
    if object.textures.is_empty() {
        return Err(GenerationError::ExportValidation(
            "no texture present".to_string(),
        ));
    }
    Ok(())
}

/// Validate and encode the object as a binary glTF byte vector.
pub fn encode_glb(object: &RawObject) -> Result<Vec<u8>, GenerationError> {
    validate(object)?;

    let mut bin: Vec<u8> = Vec::new();
    let mut root = json::Root::default();

    let buffer = root.push(json::Buffer {
        byte_length: USize64(0), // patched once the buffer is assembled
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
        uri: None,
    });

    // Positions
    let (pos_offset, pos_len) = push_f32s(&mut bin, object.positions.iter().flatten());
    let pos_view = root.push(json::buffer::View {
        buffer,
        byte_length: USize64::from(pos_len),
        byte_offset: Some(USize64::from(pos_offset)),
        byte_stride: None,
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
        target: Some(Valid(json::buffer::Target::ArrayBuffer)),
    });
    let (min, max) = position_bounds(&object.positions);
    let positions = root.push(json::Accessor {
        buffer_view: Some(pos_view),
        byte_offset: Some(USize64(0)),
        count: USize64::from(object.positions.len()),
        component_type: Valid(json::accessor::GenericComponentType(
            json::accessor::ComponentType::F32,
        )),
        extensions: Default::default(),
        extras: Default::default(),
        type_: Valid(json::accessor::Type::Vec3),
        min: Some(json::Value::from(min.to_vec())),
        max: Some(json::Value::from(max.to_vec())),
        name: None,
        normalized: false,
        sparse: None,
    });

    // Normals (optional)
    let normals = if object.normals.len() == object.positions.len() {
        let (offset, len) = push_f32s(&mut bin, object.normals.iter().flatten());
        let view = root.push(json::buffer::View {
            buffer,
            byte_length: USize64::from(len),
            byte_offset: Some(USize64::from(offset)),
            byte_stride: None,
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            target: Some(Valid(json::buffer::Target::ArrayBuffer)),
        });
        Some(root.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: Some(USize64(0)),
            count: USize64::from(object.normals.len()),
            component_type: Valid(json::accessor::GenericComponentType(
                json::accessor::ComponentType::F32,
            )),
            extensions: Default::default(),
            extras: Default::default(),
            type_: Valid(json::accessor::Type::Vec3),
            min: None,
            max: None,
            name: None,
            normalized: false,
            sparse: None,
        }))
    } else {
        None
    };

    // Texture coordinates (optional)
    let uvs = if object.uvs.len() == object.positions.len() {
        let (offset, len) = push_f32s(&mut bin, object.uvs.iter().flatten());
        let view = root.push(json::buffer::View {
            buffer,
            byte_length: USize64::from(len),
            byte_offset: Some(USize64::from(offset)),
            byte_stride: None,
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            target: Some(Valid(json::buffer::Target::ArrayBuffer)),
        });
        Some(root.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: Some(USize64(0)),
            count: USize64::from(object.uvs.len()),
            component_type: Valid(json::accessor::GenericComponentType(
                json::accessor::ComponentType::F32,
            )),
            extensions: Default::default(),
            extras: Default::default(),
            type_: Valid(json::accessor::Type::Vec2),
            min: None,
            max: None,
            name: None,
            normalized: false,
            sparse: None,
        }))
    } else {
        None
    };

    // Indices
    let index_bytes: Vec<u8> = object
        .indices
        .iter()
        .flat_map(|i| i.to_le_bytes())
        .collect();
    let (idx_offset, idx_len) = push_bytes(&mut bin, &index_bytes);
    let idx_view = root.push(json::buffer::View {
        buffer,
        byte_length: USize64::from(idx_len),
        byte_offset: Some(USize64::from(idx_offset)),
        byte_stride: None,
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
        target: Some(Valid(json::buffer::Target::ElementArrayBuffer)),
    });
    let indices = root.push(json::Accessor {
        buffer_view: Some(idx_view),
        byte_offset: Some(USize64(0)),
        count: USize64::from(object.indices.len()),
        component_type: Valid(json::accessor::GenericComponentType(
            json::accessor::ComponentType::U32,
        )),
        extensions: Default::default(),
        extras: Default::default(),
        type_: Valid(json::accessor::Type::Scalar),
        min: None,
        max: None,
        name: None,
        normalized: false,
        sparse: None,
    });

    // Base-color texture, PNG-encoded into the same buffer
    let png = encode_texture_png(&object.textures[0])?;
    let (png_offset, png_len) = push_bytes(&mut bin, &png);
    let png_view = root.push(json::buffer::View {
        buffer,
        byte_length: USize64::from(png_len),
        byte_offset: Some(USize64::from(png_offset)),
        byte_stride: None,
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
        target: None,
    });
    let image = root.push(json::Image {
        buffer_view: Some(png_view),
        mime_type: Some(json::image::MimeType("image/png".to_string())),
        uri: None,
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
    });
    let texture = root.push(json::Texture {
        sampler: None,
        source: image,
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
    });
    // A base-color texture only makes sense when texcoords exist; the image
    // itself is embedded either way.
    let material = uvs.map(|_| {
        root.push(json::Material {
            pbr_metallic_roughness: json::material::PbrMetallicRoughness {
                base_color_texture: Some(json::texture::Info {
                    index: texture,
                    tex_coord: 0,
                    extensions: Default::default(),
                    extras: Default::default(),
                }),
                ..Default::default()
            },
            ..Default::default()
        })
    });

    let primitive = json::mesh::Primitive {
        attributes: {
            let mut map = std::collections::BTreeMap::new();
            map.insert(Valid(json::mesh::Semantic::Positions), positions);
            if let Some(normals) = normals {
                map.insert(Valid(json::mesh::Semantic::Normals), normals);
            }
            if let Some(uvs) = uvs {
                map.insert(Valid(json::mesh::Semantic::TexCoords(0)), uvs);
            }
            map
        },
        extensions: Default::default(),
        extras: Default::default(),
        indices: Some(indices),
        material,
        mode: Valid(json::mesh::Mode::Triangles),
        targets: None,
    };

    let mesh = root.push(json::Mesh {
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
        primitives: vec![primitive],
        weights: None,
    });

    let node = root.push(json::Node {
        mesh: Some(mesh),
        ..Default::default()
    });
    let scene = root.push(json::Scene {
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
        nodes: vec![node],
    });
    root.scene = Some(scene);

    // Patch in the final buffer length, pad both chunks to 4 bytes
    while bin.len() % 4 != 0 {
        bin.push(0);
    }
    root.buffers[0].byte_length = USize64::from(bin.len());

    let json_string = json::serialize::to_string(&root)
        .map_err(|e| GenerationError::Export(format!("glTF serialization: {e}")))?;
    let mut json_bytes = json_string.into_bytes();
    while json_bytes.len() % 4 != 0 {
        json_bytes.push(b' ');
    }

    let total_length = 12 + 8 + json_bytes.len() + 8 + bin.len();
    let glb = gltf::binary::Glb {
        header: gltf::binary::Header {
            magic: *b"glTF",
            version: 2,
            length: total_length as u32,
        },
        json: Cow::Owned(json_bytes),
        bin: Some(Cow::Owned(bin)),
    };

    let mut out = Vec::with_capacity(total_length);
    glb.to_writer(&mut out)
        .map_err(|e| GenerationError::Export(format!("glb write: {e}")))?;

    Ok(out)
}

/// Validate, encode and write the object to `path`.
pub fn export_glb(object: &RawObject, path: &Path) -> Result<(), GenerationError> {
    let bytes = encode_glb(object)?;
    std::fs::write(path, &bytes)?;
    info!("Exported {} bytes to {:?}", bytes.len(), path);
    Ok(())
}

fn encode_texture_png(texture: &TextureImage) -> Result<Vec<u8>, GenerationError> {
    let image = image::RgbaImage::from_raw(texture.width, texture.height, texture.rgba.clone())
        .ok_or_else(|| {
            GenerationError::Export(format!(
                "texture buffer does not match {}x{}",
                texture.width, texture.height
            ))
        })?;
    let mut cursor = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .map_err(|e| GenerationError::Export(format!("png encode: {e}")))?;
    Ok(cursor.into_inner())
}

/// Append bytes 4-byte aligned, returning (offset, length).
fn push_bytes(bin: &mut Vec<u8>, bytes: &[u8]) -> (usize, usize) {
    while bin.len() % 4 != 0 {
        bin.push(0);
    }
    let offset = bin.len();
    bin.extend_from_slice(bytes);
    (offset, bytes.len())
}

fn push_f32s<'a>(bin: &mut Vec<u8>, values: impl Iterator<Item = &'a f32>) -> (usize, usize) {
    let bytes: Vec<u8> = values.flat_map(|v| v.to_le_bytes()).collect();
    push_bytes(bin, &bytes)
}

fn position_bounds(positions: &[[f32; 3]]) -> ([f32; 3], [f32; 3]) {
    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for p in positions {
        for axis in 0..3 {
            min[axis] = min[axis].min(p[axis]);
            max[axis] = max[axis].max(p[axis]);
        }
    }
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::generator::testing::unit_quad;

    #[test]
    fn test_encode_produces_parseable_glb() {
        let bytes = encode_glb(&unit_quad()).unwrap();
        assert!(!bytes.is_empty());

        let gltf = gltf::Gltf::from_slice(&bytes).unwrap();
        assert_eq!(gltf.meshes().count(), 1);
        assert_eq!(gltf.images().count(), 1);
        assert_eq!(gltf.materials().len(), 1);

        let mesh = gltf.meshes().next().unwrap();
        let primitive = mesh.primitives().next().unwrap();
        assert_eq!(primitive.indices().unwrap().count(), 6);
    }

    #[test]
    fn test_empty_mesh_rejected() {
        let mut object = unit_quad();
        object.positions.clear();
        let err = encode_glb(&object).unwrap_err();
        assert!(matches!(err, GenerationError::ExportValidation(_)));
    }

    #[test]
    fn test_missing_texture_rejected() {
        let mut object = unit_quad();
        object.textures.clear();
        let err = encode_glb(&object).unwrap_err();
        assert!(matches!(err, GenerationError::ExportValidation(_)));
    }

    #[test]
    fn test_non_triangle_index_count_rejected() {
        let mut object = unit_quad();
        object.indices.pop();
        let err = encode_glb(&object).unwrap_err();
        assert!(matches!(err, GenerationError::ExportValidation(_)));
    }

    #[test]
    fn test_export_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object.glb");
        export_glb(&unit_quad(), &path).unwrap();

        let metadata = std::fs::metadata(&path).unwrap();
        assert!(metadata.len() > 0);
    }

    #[test]
    fn test_position_bounds() {
        let (min, max) = position_bounds(&[[1.0, -2.0, 0.5], [-1.0, 3.0, 0.0]]);
        assert_eq!(min, [-1.0, -2.0, 0.0]);
        assert_eq!(max, [1.0, 3.0, 0.5]);
    }
}
