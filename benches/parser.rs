use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::io;

static INPUT: &str = include_str!("../demos/widgets.quill");

fn criterion_benchmark(c: &mut Criterion) {
    let dir = std::env::temp_dir().join(format!("quill-bench-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("bench dir");
    let file = dir.join("widgets.quill");
    std::fs::write(&file, INPUT).expect("bench source");
    let path = file.to_string_lossy().into_owned();

    c.bench_function("parse", |b| {
        b.iter(|| {
            let (ok, program) = quill::frontend::parser::parse(
                black_box(&path),
                "stdlib-does-not-exist",
                &mut io::sink(),
            );
            assert!(ok);
            _ = black_box(program);
        })
    });

    let _ = std::fs::remove_dir_all(dir);
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
