//! Imports procedural meshes and prints what the pipeline produced
//!
//! ```text
//! import_primitives --mesh icosphere --subdivisions 4
//! import_primitives --mesh grid --size 64 --config import.toml
//! import_primitives --print-config > import.toml
//! ```

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use virtmesh_algorithms::{DeterministicPartitioner, MetisPartitioner};
use virtmesh_core::primitives::{generate_cube, generate_icosphere, generate_plane_grid, PrimitiveMesh};
use virtmesh_core::{GraphPartitioner, Vector3f};
use virtmesh_import::{
    import_meshes, AssetRegistry, HostMemoryUploader, ImportConfig, ImportContext, Mesh, MeshSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MeshKind {
    Icosphere,
    Grid,
    Cube,
    /// Several icospheres next to each other
    Islands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PartitionerKind {
    Metis,
    Deterministic,
}

#[derive(Debug, Parser)]
#[command(name = "import_primitives", about = "Build meshlet LOD data for procedural meshes")]
struct Args {
    #[arg(long, value_enum, default_value_t = MeshKind::Icosphere)]
    mesh: MeshKind,

    /// Icosphere subdivision level
    #[arg(long, default_value_t = 4)]
    subdivisions: u32,

    /// Grid vertices per side
    #[arg(long, default_value_t = 64)]
    size: usize,

    /// Number of copies imported in parallel
    #[arg(long, default_value_t = 1)]
    copies: usize,

    #[arg(long, value_enum, default_value_t = PartitionerKind::Metis)]
    partitioner: PartitionerKind,

    /// TOML file with an `ImportConfig`
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Include a planar TEXCOORD_0 channel
    #[arg(long)]
    uvs: bool,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ImportConfig> {
    let Some(path) = path else {
        return Ok(ImportConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid import config in {}", path.display()))
}

fn make_mesh(args: &Args) -> PrimitiveMesh {
    match args.mesh {
        MeshKind::Icosphere => generate_icosphere(args.subdivisions),
        MeshKind::Grid => generate_plane_grid(args.size),
        MeshKind::Cube => generate_cube(),
        MeshKind::Islands => (1..5).fold(generate_icosphere(args.subdivisions), |mesh, i| {
            mesh.merge(
                generate_icosphere(args.subdivisions).translated(Vector3f::new(3.0 * i as f32, 0.0, 0.0)),
            )
        }),
    }
}

fn print_mesh(index: usize, mesh: &Mesh) {
    println!("mesh #{} ({})", index, mesh.handle);
    for (level, lod) in mesh.data.lods.iter().enumerate() {
        println!(
            "  LOD {}: {:>7} triangles {:>5} meshlets {:>8} geometry bytes  error {:.4}",
            level,
            lod.clusters.triangle_count(),
            lod.clusters.meshlet_count(),
            lod.clusters.geometry.num_storage_bytes_used(),
            lod.error
        );
    }

    if let Some(adjacency) = &mesh.data.meshlet_adjacency {
        println!(
            "  LOD 0 adjacency: {} edges, edge cut {}",
            adjacency.graph.edge_count(),
            adjacency.edge_cut
        );
    }

    if let Some(virtual_geometry) = &mesh.data.virtual_geometry {
        println!(
            "  virtual geometry: {} meshlets, {} groups, {} levels",
            virtual_geometry.clusters.meshlet_count(),
            virtual_geometry.meshlet_groups.len(),
            virtual_geometry.lod_count
        );
        for stats in &virtual_geometry.pass_statistics {
            println!(
                "    pass {}: {} -> {} meshlets in {} groups, {}/{} vertices welded, {} locked, {} stalled, {} skipped",
                stats.lod_level,
                stats.input_meshlet_count,
                stats.output_meshlet_count,
                stats.group_count,
                stats.welded_vertex_count,
                stats.input_vertex_count,
                stats.locked_vertex_count,
                stats.group_simplification_failure_count,
                stats.skipped_group_count
            );
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = load_config(args.config.as_ref())?;
    if args.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }
    if args.copies == 0 {
        bail!("--copies must be at least 1");
    }

    let partitioner: Arc<dyn GraphPartitioner> = match args.partitioner {
        PartitionerKind::Metis => Arc::new(MetisPartitioner::new()),
        PartitionerKind::Deterministic => Arc::new(DeterministicPartitioner),
    };
    let uploader = Arc::new(HostMemoryUploader::new());
    let ctx = ImportContext::new(Arc::new(AssetRegistry::new()), uploader.clone(), partitioner, config);

    let mesh = make_mesh(&args);
    let (vertices, layout) = if args.uvs {
        mesh.to_vertex_buffer_with_uvs()
    } else {
        mesh.to_vertex_buffer()
    };
    let source = MeshSource {
        vertices: &vertices,
        indices: &mesh.indices,
        layout: &layout,
    };
    let sources = vec![source; args.copies];

    let started = std::time::Instant::now();
    let imported = import_meshes(&ctx, &sources)?;
    log::info!(
        "imported {} meshes in {:.2?}, {} bytes uploaded",
        imported.len(),
        started.elapsed(),
        uploader.allocated_bytes()
    );

    for (index, mesh) in imported.iter().enumerate() {
        print_mesh(index, mesh);
    }
    Ok(())
}
