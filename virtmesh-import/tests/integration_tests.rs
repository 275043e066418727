//! Integration tests for virtmesh-import
//!
//! End-to-end imports of procedural meshes: LOD chain shape, virtual
//! geometry, position quantization, uploads and asset registration.

use std::sync::Arc;
use virtmesh_algorithms::DeterministicPartitioner;
use virtmesh_core::primitives::{generate_cube, generate_icosphere, generate_plane_grid, PrimitiveMesh};
use virtmesh_core::{Error, Point3f, Result, Vector3f};
use virtmesh_import::*;

fn make_context(config: ImportConfig) -> (ImportContext, Arc<HostMemoryUploader>) {
    let uploader = Arc::new(HostMemoryUploader::new());
    let ctx = ImportContext::new(
        Arc::new(AssetRegistry::new()),
        uploader.clone(),
        Arc::new(DeterministicPartitioner),
        config,
    );
    (ctx, uploader)
}

fn import(ctx: &ImportContext, mesh: &PrimitiveMesh) -> Result<Arc<Mesh>> {
    let (bytes, layout) = mesh.to_vertex_buffer();
    process_mesh_data(ctx, &bytes, &mesh.indices, &layout)
}

/// Decodes every meshlet and checks each position lands on a source vertex
fn assert_positions_decode(clusters: &ClusterGeometry, source: &[Point3f], grid_bits: u32) {
    let quantizer = VertexDataQuantizer::new(QuantizationConfig::default().with_grid_bits(grid_bits));
    let tolerance = 1.0 / quantizer.grid_size();

    for (i, (meshlet, bounds)) in clusters.meshlets.iter().zip(&clusters.cull_bounds).enumerate() {
        let decoded = quantizer
            .decode_meshlet_positions(&clusters.geometry, meshlet, bounds)
            .unwrap();
        assert_eq!(decoded.len(), meshlet.vertex_count as usize);

        for p in decoded {
            assert!(
                bounds.vis_culling_sphere.contains(&p, 1e-4),
                "meshlet {} decoded {:?} outside its culling sphere",
                i,
                p
            );
            let nearest = source
                .iter()
                .map(|s| (s - p).abs().max())
                .fold(f32::INFINITY, f32::min);
            assert!(
                nearest <= tolerance,
                "meshlet {} decoded {:?}, {} away from any source vertex",
                i,
                p,
                nearest
            );
        }
    }
}

#[test]
fn test_import_icosphere() {
    let (ctx, uploader) = make_context(ImportConfig::default());
    let sphere = generate_icosphere(3);

    let mesh = import(&ctx, &sphere).unwrap();

    assert!(ctx.registry.contains(mesh.handle));
    assert_eq!(ctx.registry.len(), 1);

    let lods = &mesh.data.lods;
    assert!(!lods.is_empty() && lods.len() <= 4);
    assert_eq!(lods[0].clusters.triangle_count(), sphere.triangle_count());
    assert_eq!(lods[0].error, 0.0);
    for pair in lods.windows(2) {
        assert!(
            pair[1].clusters.triangle_count() < pair[0].clusters.triangle_count(),
            "every LOD must be coarser than the previous one"
        );
    }

    let virtual_geometry = mesh.data.virtual_geometry.as_ref().unwrap();
    assert!(virtual_geometry.clusters.meshlet_count() > lods[0].clusters.meshlet_count());
    assert!(virtual_geometry.lod_count >= 2);
    assert_eq!(
        virtual_geometry.pass_statistics.len(),
        virtual_geometry.lod_count as usize - 1
    );

    let adjacency = mesh.data.meshlet_adjacency.as_ref().unwrap();
    assert_eq!(adjacency.graph.node_count(), lods[0].clusters.meshlet_count());
    assert_eq!(adjacency.partition.len(), lods[0].clusters.meshlet_count());

    assert!(mesh.data.layout_table.is_empty());
    assert_eq!(mesh.data.attribute_stride, 0);
    assert_eq!(mesh.data.quantization_grid_bits, 8);
    assert!(mesh.data.bounds.sphere.radius >= 1.0 - 1e-4);

    // the virtual geometry is what gets uploaded
    assert_eq!(mesh.buffers.len(), MeshBufferKey::ALL.len());
    assert_eq!(uploader.buffer_count(), MeshBufferKey::ALL.len());
    let geometry = uploader.read(mesh.buffer(MeshBufferKey::Geometry).unwrap()).unwrap();
    assert_eq!(geometry, virtual_geometry.clusters.geometry.as_bytes());
    let cull_data = uploader
        .read(mesh.buffer(MeshBufferKey::MeshletsCullData).unwrap())
        .unwrap();
    assert_eq!(cull_data.len(), virtual_geometry.clusters.meshlet_count() * 72);
    let label = uploader.label(mesh.buffer(MeshBufferKey::MicroIndices).unwrap()).unwrap();
    assert!(label.ends_with("/MICRO_INDICES"), "unexpected label {}", label);
}

#[test]
fn test_quantized_positions_round_trip() {
    let (ctx, _) = make_context(ImportConfig::default().with_lod_chain(false));
    let sphere = generate_icosphere(2);

    let mesh = import(&ctx, &sphere).unwrap();

    assert_positions_decode(&mesh.data.lods[0].clusters, &sphere.positions, 8);
    let virtual_geometry = mesh.data.virtual_geometry.as_ref().unwrap();
    assert_positions_decode(&virtual_geometry.clusters, &sphere.positions, 8);

    let clusters = &mesh.data.lods[0].clusters;
    let expected_bits: usize = clusters
        .meshlets
        .iter()
        .map(|m| (m.vertex_count * 3 * m.bitrate) as usize)
        .sum();
    assert_eq!(clusters.geometry.num_bits_used(), expected_bits);
    for m in &clusters.meshlets {
        assert!((1..=32).contains(&m.bitrate));
    }
}

#[test]
fn test_large_mesh_uses_wider_bitrates() {
    let (ctx, _) = make_context(
        ImportConfig::default()
            .with_lod_chain(false)
            .with_virtual_geometry(false)
            .with_meshlet_adjacency(false),
    );
    let mut big = generate_icosphere(2);
    for p in &mut big.positions {
        *p = Point3f::from(p.coords * 100.0);
    }

    let small = import(&ctx, &generate_icosphere(2)).unwrap();
    let large = import(&ctx, &big).unwrap();

    let max_bitrate = |mesh: &Mesh| {
        mesh.data.lods[0]
            .clusters
            .meshlets
            .iter()
            .map(|m| m.bitrate)
            .max()
            .unwrap()
    };
    assert!(max_bitrate(&large) >= max_bitrate(&small) + 5);
    assert_positions_decode(&large.data.lods[0].clusters, &big.positions, 8);
}

#[test]
fn test_uv_attributes_are_encoded() {
    let (ctx, _) = make_context(ImportConfig::default().with_lod_chain(false));
    let grid = generate_plane_grid(17);
    let (bytes, layout) = grid.to_vertex_buffer_with_uvs();

    let mesh = process_mesh_data(&ctx, &bytes, &grid.indices, &layout).unwrap();

    assert_eq!(mesh.data.attribute_stride, 4);
    assert_eq!(mesh.data.layout_table.get("TEXCOORD_0"), Some(&0));
    for clusters in mesh
        .data
        .lods
        .iter()
        .map(|lod| &lod.clusters)
        .chain(mesh.data.virtual_geometry.as_ref().map(|v| &v.clusters))
    {
        assert_eq!(clusters.attributes.len(), clusters.vertex_count * 4);
    }
}

#[test]
fn test_raw_attributes_keep_source_layout() {
    let mut config = ImportConfig::default().with_lod_chain(false);
    config.encode_attributes = false;
    let (ctx, _) = make_context(config);
    let grid = generate_plane_grid(9);
    let (bytes, layout) = grid.to_vertex_buffer_with_uvs();

    let mesh = process_mesh_data(&ctx, &bytes, &grid.indices, &layout).unwrap();

    assert_eq!(mesh.data.attribute_stride, 8);
    assert_eq!(mesh.data.layout_table, layout.runtime_layout_table());
    let clusters = &mesh.data.lods[0].clusters;
    assert_eq!(clusters.attributes.len(), clusters.vertex_count * 8);
}

#[test]
fn test_without_virtual_geometry_uploads_lod0() {
    let (ctx, uploader) = make_context(ImportConfig::default().with_virtual_geometry(false));

    let mesh = import(&ctx, &generate_cube()).unwrap();

    assert!(mesh.data.virtual_geometry.is_none());
    let meshlets = uploader.read(mesh.buffer(MeshBufferKey::Meshlets).unwrap()).unwrap();
    assert_eq!(meshlets.len(), mesh.data.lods[0].clusters.meshlet_count() * 24);
}

#[test]
fn test_invalid_input_registers_nothing() {
    let (ctx, uploader) = make_context(ImportConfig::default());
    let sphere = generate_icosphere(1);
    let (bytes, layout) = sphere.to_vertex_buffer();

    let out_of_range = process_mesh_data(&ctx, &bytes, &[0, 1, 10_000], &layout);
    assert!(matches!(out_of_range, Err(Error::InvalidData(_))));

    let not_triangles = process_mesh_data(&ctx, &bytes, &[0, 1], &layout);
    assert!(not_triangles.is_err());

    let empty = process_mesh_data(&ctx, &bytes, &[], &layout);
    assert!(empty.is_err());

    assert!(ctx.registry.is_empty());
    assert_eq!(uploader.buffer_count(), 0);
}

struct FailingUploader;

impl DeviceUploader for FailingUploader {
    fn upload(&self, label: &str, _bytes: &[u8]) -> Result<DeviceAddress> {
        Err(Error::Upload(format!("device lost while uploading {}", label)))
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[test]
fn test_upload_failure_registers_nothing() {
    let ctx = ImportContext::new(
        Arc::new(AssetRegistry::new()),
        Arc::new(FailingUploader),
        Arc::new(DeterministicPartitioner),
        ImportConfig::default().with_lod_chain(false),
    );

    let result = import(&ctx, &generate_icosphere(1));

    assert!(matches!(result, Err(Error::Upload(_))));
    assert!(ctx.registry.is_empty());
}

#[test]
fn test_registry_rejects_duplicate_handles() {
    let (ctx, _) = make_context(ImportConfig::default().with_lod_chain(false));
    let mesh = import(&ctx, &generate_cube()).unwrap();

    assert!(ctx.registry.register(mesh.clone()).is_err());
    assert_eq!(ctx.registry.len(), 1);

    let removed = ctx.registry.remove(mesh.handle).unwrap();
    assert!(Arc::ptr_eq(&removed, &mesh));
    assert!(ctx.registry.get(mesh.handle).is_none());
}

#[test]
fn test_import_meshes_in_parallel() {
    let config = ImportConfig::default().with_threads(ThreadPoolConfig::default().with_threads(2));
    let (ctx, _) = make_context(config);

    let meshes = [
        generate_icosphere(2),
        generate_cube(),
        generate_plane_grid(12),
        generate_icosphere(1).translated(Vector3f::new(4.0, 0.0, 0.0)),
    ];
    let buffers: Vec<_> = meshes.iter().map(|m| m.to_vertex_buffer()).collect();
    let sources: Vec<MeshSource<'_>> = meshes
        .iter()
        .zip(&buffers)
        .map(|(mesh, (bytes, layout))| MeshSource {
            vertices: bytes,
            indices: &mesh.indices,
            layout,
        })
        .collect();

    let imported = import_meshes(&ctx, &sources).unwrap();

    assert_eq!(imported.len(), meshes.len());
    assert_eq!(ctx.registry.len(), meshes.len());
    for (mesh, source) in imported.iter().zip(&meshes) {
        assert_eq!(mesh.data.lods[0].clusters.triangle_count(), source.triangle_count());
        assert!(ctx.registry.contains(mesh.handle));
    }
}

#[test]
fn test_sequential_import_matches_parallel_shape() {
    let config = ImportConfig::default().with_threads(ThreadPoolConfig::default().with_enabled(false));
    let (ctx, _) = make_context(config);
    let sphere = generate_icosphere(2);
    let (bytes, layout) = sphere.to_vertex_buffer();
    let source = MeshSource {
        vertices: &bytes,
        indices: &sphere.indices,
        layout: &layout,
    };

    let imported = import_meshes(&ctx, &[source, source]).unwrap();

    assert_eq!(imported.len(), 2);
    assert_ne!(imported[0].handle, imported[1].handle);
    assert_eq!(
        imported[0].data.lods.len(),
        imported[1].data.lods.len(),
        "importing the same mesh twice must be deterministic"
    );
}
