use criterion::{criterion_group, criterion_main, Criterion};
use std::path::Path;
use texmk::canon::{canon_path, canon_path_in};

pub fn bench_canon(c: &mut Criterion) {
    c.bench_function("canon plain", |b| {
        b.iter(|| {
            let path = "chapters/background/figures/\
                generated/convergence-by-iteration.pdf";
            canon_path(path);
        })
    });

    c.bench_function("canon with parents", |b| {
        b.iter(|| {
            let path = "chapters/background/figures/\
                ../../../\
                ./build/chapters/background.aux";
            canon_path(path);
        })
    });

    // What every INPUT line of a file listing goes through.
    c.bench_function("canon under root", |b| {
        let root = Path::new("/home/someone/papers/thesis");
        b.iter(|| {
            let path = "/home/someone/papers/thesis/./chapters/\
                background/../results.tex";
            canon_path_in(root, path);
        })
    });
}

criterion_group!(benches, bench_canon);
criterion_main!(benches);
