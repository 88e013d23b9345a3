use serde::{Deserialize, Serialize};

/// Triangle mesh produced by reconstruction and consumed by the exporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub vertices: Vec<[f32; 3]>,
    pub faces: Vec<[u32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_colors: Option<Vec<[u8; 4]>>,
}

impl Mesh {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check the index and color invariants.
    pub fn validate(&self) -> Result<(), MeshError> {
        if self.vertices.is_empty() || self.faces.is_empty() {
            return Err(MeshError::Empty);
        }

        let vertex_count = self.vertices.len();
        for (face, indices) in self.faces.iter().enumerate() {
            if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertex_count) {
                return Err(MeshError::IndexOutOfBounds {
                    face,
                    index,
                    vertex_count,
                });
            }
        }

        if let Some(colors) = &self.vertex_colors {
            if colors.len() != vertex_count {
                return Err(MeshError::ColorCountMismatch {
                    colors: colors.len(),
                    vertex_count,
                });
            }
        }

        if self.vertices.iter().flatten().any(|c| !c.is_finite()) {
            return Err(MeshError::NonFinitePosition);
        }

        Ok(())
    }

    /// Axis-aligned bounds of the vertex positions, `None` for an empty mesh.
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        let first = *self.vertices.first()?;
        Some(self.vertices.iter().fold((first, first), |(mut min, mut max), v| {
            for axis in 0..3 {
                min[axis] = min[axis].min(v[axis]);
                max[axis] = max[axis].max(v[axis]);
            }
            (min, max)
        }))
    }

    /// Unit cube (edge 1.0, centered at the origin) with one color per corner.
    ///
    /// Stand-in output whenever the reconstruction model cannot be loaded.
    pub fn placeholder_cube() -> Self {
        let vertices = [
            [-1.0, -1.0, -1.0],
            [1.0, -1.0, -1.0],
            [1.0, 1.0, -1.0],
            [-1.0, 1.0, -1.0],
            [-1.0, -1.0, 1.0],
            [1.0, -1.0, 1.0],
            [1.0, 1.0, 1.0],
            [-1.0, 1.0, 1.0],
        ]
        .map(|v: [f32; 3]| v.map(|c| c * 0.5))
        .to_vec();

        let faces = vec![
            [0, 1, 2],
            [0, 2, 3], // back
            [4, 6, 5],
            [4, 7, 6], // front
            [0, 4, 5],
            [0, 5, 1], // bottom
            [2, 6, 7],
            [2, 7, 3], // top
            [0, 3, 7],
            [0, 7, 4], // left
            [1, 5, 6],
            [1, 6, 2], // right
        ];

        let vertex_colors = vec![
            [255, 0, 0, 255],
            [0, 255, 0, 255],
            [0, 0, 255, 255],
            [255, 255, 0, 255],
            [255, 0, 255, 255],
            [0, 255, 255, 255],
            [255, 255, 255, 255],
            [128, 128, 128, 255],
        ];

        Self {
            vertices,
            faces,
            vertex_colors: Some(vertex_colors),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MeshError {
    #[error("Mesh has no vertices or no faces")]
    Empty,

    #[error("Face {face} references vertex {index}, but the mesh only has {vertex_count} vertices")]
    IndexOutOfBounds {
        face: usize,
        index: u32,
        vertex_count: usize,
    },

    #[error("Mesh has {colors} vertex colors for {vertex_count} vertices")]
    ColorCountMismatch { colors: usize, vertex_count: usize },

    #[error("Mesh contains a non-finite vertex position")]
    NonFinitePosition,
}
