//! Binary glTF 2.0 (`.glb`) export.
//!
//! Layout: 12-byte header, a JSON chunk padded with spaces and a BIN chunk
//! padded with zeros, both to 4-byte boundaries. The BIN buffer holds
//! positions (`f32` VEC3), optional colors (normalized `u8` VEC4) and
//! triangle indices (`u32`), in that order.

use serde_json::json;
use std::io::Write;
use std::path::Path;

use crate::models::mesh::{Mesh, MeshError};

pub const GLB_MAGIC: u32 = 0x4654_6C67;
pub const GLB_VERSION: u32 = 2;
pub const CHUNK_JSON: u32 = 0x4E4F_534A;
pub const CHUNK_BIN: u32 = 0x004E_4942;

const COMPONENT_UNSIGNED_BYTE: u32 = 5121;
const COMPONENT_UNSIGNED_INT: u32 = 5125;
const COMPONENT_FLOAT: u32 = 5126;
const TARGET_ARRAY_BUFFER: u32 = 34962;
const TARGET_ELEMENT_ARRAY_BUFFER: u32 = 34963;
const MODE_TRIANGLES: u32 = 4;

/// Write `mesh` to `output_path` as a `.glb` file.
///
/// The file is written to a sibling temp file and renamed into place, so a
/// failure never leaves a partial asset behind.
pub fn export_glb(mesh: &Mesh, output_path: &Path) -> Result<(), ExportError> {
    let bytes = encode_glb(mesh)?;

    let parent = match output_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut file = tempfile::Builder::new()
        .prefix(".export-")
        .suffix(".glb.part")
        .tempfile_in(parent)?;
    file.write_all(&bytes)?;
    file.as_file().sync_all()?;
    file.persist(output_path).map_err(|e| ExportError::Io(e.error))?;

    tracing::info!(
        path = %output_path.display(),
        bytes = bytes.len(),
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "Mesh exported as GLB"
    );
    Ok(())
}

/// Encode `mesh` into GLB bytes.
pub fn encode_glb(mesh: &Mesh) -> Result<Vec<u8>, ExportError> {
    mesh.validate()?;

    let vertex_count = mesh.vertices.len();
    let mut bin = Vec::with_capacity(vertex_count * 16 + mesh.faces.len() * 12);

    let positions_offset = bin.len();
    for v in &mesh.vertices {
        for c in v {
            bin.extend_from_slice(&c.to_le_bytes());
        }
    }
    let positions_len = bin.len() - positions_offset;

    let colors = mesh.vertex_colors.as_ref().map(|colors| {
        let offset = bin.len();
        for c in colors {
            bin.extend_from_slice(c);
        }
        (offset, bin.len() - offset)
    });

    let indices_offset = bin.len();
    for face in &mesh.faces {
        for i in face {
            bin.extend_from_slice(&i.to_le_bytes());
        }
    }
    let indices_len = bin.len() - indices_offset;

    // Bounds are required on POSITION accessors; validate() guarantees a vertex exists
    let (min, max) = mesh.bounds().ok_or(MeshError::Empty)?;

    let mut buffer_views = vec![
        json!({"buffer": 0, "byteOffset": positions_offset, "byteLength": positions_len, "target": TARGET_ARRAY_BUFFER}),
    ];
    let mut accessors = vec![json!({
        "bufferView": 0,
        "componentType": COMPONENT_FLOAT,
        "count": vertex_count,
        "type": "VEC3",
        "min": min,
        "max": max,
    })];
    let mut attributes = json!({"POSITION": 0});

    if let Some((offset, len)) = colors {
        buffer_views.push(json!({"buffer": 0, "byteOffset": offset, "byteLength": len, "target": TARGET_ARRAY_BUFFER}));
        accessors.push(json!({
            "bufferView": buffer_views.len() - 1,
            "componentType": COMPONENT_UNSIGNED_BYTE,
            "normalized": true,
            "count": vertex_count,
            "type": "VEC4",
        }));
        attributes["COLOR_0"] = json!(accessors.len() - 1);
    }

    buffer_views.push(json!({
        "buffer": 0,
        "byteOffset": indices_offset,
        "byteLength": indices_len,
        "target": TARGET_ELEMENT_ARRAY_BUFFER,
    }));
    accessors.push(json!({
        "bufferView": buffer_views.len() - 1,
        "componentType": COMPONENT_UNSIGNED_INT,
        "count": mesh.faces.len() * 3,
        "type": "SCALAR",
    }));
    let indices_accessor = accessors.len() - 1;

    pad_to_four(&mut bin, 0);

    let document = json!({
        "asset": {"version": "2.0", "generator": concat!("model3d-worker ", env!("CARGO_PKG_VERSION"))},
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [{"mesh": 0}],
        "meshes": [{
            "primitives": [{
                "attributes": attributes,
                "indices": indices_accessor,
                "mode": MODE_TRIANGLES,
            }]
        }],
        "buffers": [{"byteLength": bin.len()}],
        "bufferViews": buffer_views,
        "accessors": accessors,
    });

    let mut json_chunk = serde_json::to_vec(&document)?;
    pad_to_four(&mut json_chunk, b' ');

    let total_len = 12 + 8 + json_chunk.len() + 8 + bin.len();
    let total_len = u32::try_from(total_len).map_err(|_| ExportError::TooLarge(total_len))?;

    let mut out = Vec::with_capacity(total_len as usize);
    out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    out.extend_from_slice(&GLB_VERSION.to_le_bytes());
    out.extend_from_slice(&total_len.to_le_bytes());

    out.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json_chunk);

    out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
    out.extend_from_slice(&bin);

    Ok(out)
}

fn pad_to_four(buf: &mut Vec<u8>, fill: u8) {
    while buf.len() % 4 != 0 {
        buf.push(fill);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Mesh cannot be exported: {0}")]
    InvalidMesh(#[from] MeshError),

    #[error("GLB encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("GLB of {0} bytes exceeds the 4 GiB format limit")]
    TooLarge(usize),

    #[error("GLB write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Export task failed: {0}")]
    Task(String),
}
