//! Benchmarks for meshlet generation and LOD simplification on icospheres

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use virtmesh_core::{primitives::generate_icosphere, VertexView};
use virtmesh_preprocess::MeshPreprocessor;

fn bench_preprocess(c: &mut Criterion) {
    let subdivisions = [3, 4, 5];
    let ratios = [0.25, 0.5];

    let mut group = c.benchmark_group("preprocess");
    let preprocessor = MeshPreprocessor::new();

    for &level in &subdivisions {
        let sphere = generate_icosphere(level);
        let (bytes, layout) = sphere.to_vertex_buffer();
        let view = VertexView::new(&bytes, layout.stride()).unwrap();
        let face_count = sphere.triangle_count();

        group.bench_with_input(
            BenchmarkId::new("meshlets", format!("{}f", face_count)),
            &(&view, &sphere.indices),
            |b, &(view, indices)| {
                b.iter(|| {
                    let result = preprocessor.generate_meshlets(black_box(view), indices).unwrap();
                    black_box(result);
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("optimize", format!("{}f", face_count)),
            &(&view, &sphere.indices),
            |b, &(view, indices)| {
                b.iter(|| {
                    let result = preprocessor.optimize_mesh(black_box(view), indices).unwrap();
                    black_box(result);
                });
            },
        );

        for &ratio in &ratios {
            let target = ((sphere.indices.len() as f32 * ratio) as usize / 3) * 3;
            group.bench_with_input(
                BenchmarkId::new("lod", format!("{}f_r{}", face_count, (ratio * 100.0) as u32)),
                &(&view, &sphere.indices, target),
                |b, &(view, indices, target)| {
                    b.iter(|| {
                        let result = preprocessor
                            .generate_mesh_lod(black_box(view), indices, target, 0.05, false)
                            .unwrap();
                        black_box(result);
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_preprocess);
criterion_main!(benches);
