//! Collision mesh extraction from glTF/GLB assets.
//!
//! The whole node hierarchy is flattened into one world-space vertex and
//! index buffer; render data (normals, materials, textures) is ignored.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use glam::{Mat4, Vec3};

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("failed to load glTF file: {0}")]
    Gltf(#[from] gltf::Error),

    #[error("missing position data for mesh: {0}")]
    MissingPositions(String),

    #[error("mesh {0} has no geometry")]
    Empty(String),

    #[error("mesh loader task failed: {0}")]
    Task(String),
}

/// Flattened triangle soup in world (asset) space
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshData {
    pub vertices: Vec<Vec3>,
    /// Flat triangle list; empty when the source had no index data
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Triangles for a trimesh collider, sequential when no indices were present
    pub fn triangles(&self) -> Vec<[u32; 3]> {
        let flat: Vec<u32> = if self.indices.is_empty() {
            (0..self.vertices.len() as u32).collect()
        } else {
            self.indices.clone()
        };
        flat.chunks_exact(3).map(|t| [t[0], t[1], t[2]]).collect()
    }

    /// Vertices scaled per axis
    pub fn scaled_vertices(&self, scale: Vec3) -> Vec<Vec3> {
        self.vertices.iter().map(|v| *v * scale).collect()
    }
}

/// Load a glTF/GLB file and flatten every scene into one mesh
pub fn load_mesh(path: impl AsRef<Path>) -> Result<MeshData, MeshError> {
    let path = path.as_ref();
    let (document, buffers, _images) = gltf::import(path)?;

    let mut mesh = MeshData::default();
    for scene in document.scenes() {
        for node in scene.nodes() {
            collect_node(&node, Mat4::IDENTITY, &buffers, &mut mesh)?;
        }
    }

    if mesh.vertices.is_empty() {
        return Err(MeshError::Empty(path.display().to_string()));
    }

    log::debug!(
        "Loaded mesh {}: {} vertices, {} indices",
        path.display(),
        mesh.vertices.len(),
        mesh.indices.len()
    );
    Ok(mesh)
}

fn collect_node(
    node: &gltf::Node,
    parent: Mat4,
    buffers: &[gltf::buffer::Data],
    out: &mut MeshData,
) -> Result<(), MeshError> {
    let world = parent * Mat4::from_cols_array_2d(&node.transform().matrix());

    if let Some(mesh) = node.mesh() {
        let name = mesh.name().unwrap_or("unnamed").to_string();
        for primitive in mesh.primitives() {
            let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
            let positions = reader
                .read_positions()
                .ok_or_else(|| MeshError::MissingPositions(name.clone()))?;

            let offset = out.vertices.len() as u32;
            let before = out.vertices.len();
            out.vertices
                .extend(positions.map(|p| world.transform_point3(Vec3::from(p))));
            let added = (out.vertices.len() - before) as u32;

            match reader.read_indices() {
                Some(indices) => out.indices.extend(indices.into_u32().map(|i| offset + i)),
                None if primitive.mode() == gltf::mesh::Mode::Triangles => {
                    out.indices.extend(offset..offset + added);
                }
                // non-triangle topology without indices contributes points only
                None => {}
            }
        }
    }

    for child in node.children() {
        collect_node(&child, world, buffers, out)?;
    }
    Ok(())
}

/// Asset key as used for caching (`/models/a.glb` and `models/a.glb` are the same)
pub fn normalize_mesh_key(url: &str) -> &str {
    url.trim_start_matches('/')
}

/// Meshes keyed by asset path, loaded at most once
pub struct MeshCache {
    root: PathBuf,
    meshes: DashMap<String, Arc<MeshData>>,
}

impl MeshCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            meshes: DashMap::new(),
        }
    }

    pub fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(normalize_mesh_key(key))
    }

    pub fn get(&self, key: &str) -> Option<Arc<MeshData>> {
        self.meshes.get(normalize_mesh_key(key)).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, key: &str, mesh: MeshData) -> Arc<MeshData> {
        let mesh = Arc::new(mesh);
        self.meshes.insert(normalize_mesh_key(key).to_string(), mesh.clone());
        mesh
    }

    /// Blocking load through the cache
    pub fn load(&self, key: &str) -> Result<Arc<MeshData>, MeshError> {
        if let Some(mesh) = self.get(key) {
            return Ok(mesh);
        }
        let mesh = load_mesh(self.resolve(key))?;
        Ok(self.insert(key, mesh))
    }

    /// Load on the blocking pool so the tick loop never waits on disk or decode
    pub async fn load_async(self: Arc<Self>, key: String) -> Result<Arc<MeshData>, MeshError> {
        if let Some(mesh) = self.get(&key) {
            return Ok(mesh);
        }
        tokio::task::spawn_blocking(move || self.load(&key))
            .await
            .map_err(|e| MeshError::Task(e.to_string()))?
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One unindexed triangle on a scaled child of a translated parent
    const TRIANGLE_GLTF: &str = r#"{
        "asset": { "version": "2.0" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [
            { "translation": [0, 10, 0], "children": [1] },
            { "scale": [2, 2, 2], "mesh": 0 }
        ],
        "meshes": [{ "name": "tri", "primitives": [{ "attributes": { "POSITION": 0 } }] }],
        "accessors": [{
            "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
            "min": [0, 0, 0], "max": [1, 1, 0]
        }],
        "bufferViews": [{ "buffer": 0, "byteLength": 36 }],
        "buffers": [{
            "byteLength": 36,
            "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAA"
        }]
    }"#;

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("arenaserver-mesh-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_flattens_node_hierarchy() {
        let path = write_temp("triangle.gltf", TRIANGLE_GLTF);
        let mesh = load_mesh(&path).unwrap();

        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.vertices[0], Vec3::new(0.0, 10.0, 0.0));
        assert_eq!(mesh.vertices[1], Vec3::new(2.0, 10.0, 0.0));
        assert_eq!(mesh.vertices[2], Vec3::new(0.0, 12.0, 0.0));
        // unindexed triangle list gets sequential indices
        assert_eq!(mesh.indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_cache_loads_once() {
        let path = write_temp("cached.gltf", TRIANGLE_GLTF);
        let cache = MeshCache::new(path.parent().unwrap());

        let first = cache.load("/cached.gltf").unwrap();
        let second = cache.load("cached.gltf").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(load_mesh("/no/such/mesh.glb"), Err(MeshError::Gltf(_))));
    }

    #[test]
    fn test_sequential_triangles() {
        let mesh = MeshData::new(vec![Vec3::ZERO; 6], Vec::new());
        assert_eq!(mesh.triangles(), vec![[0, 1, 2], [3, 4, 5]]);
        let scaled = MeshData::new(vec![Vec3::ONE], Vec::new()).scaled_vertices(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(scaled, vec![Vec3::new(1.0, 2.0, 3.0)]);
    }

    #[tokio::test]
    async fn test_load_async() {
        let path = write_temp("async.gltf", TRIANGLE_GLTF);
        let cache = Arc::new(MeshCache::new(path.parent().unwrap()));
        let mesh = cache.clone().load_async("async.gltf".to_string()).await.unwrap();
        assert_eq!(mesh.vertices.len(), 3);
        assert!(cache.get("async.gltf").is_some());
    }
}
