use criterion::{criterion_group, criterion_main, Criterion};

use taxotree::{LineageEntry, TaxonomicHierarchy};

fn populated_hierarchy() -> TaxonomicHierarchy {
    let mut hierarchy = TaxonomicHierarchy::new();
    for phylum in 0..20 {
        for class in 0..10 {
            let lineage = format!("Bacteria; Phylum{}; Class{}_{}", phylum, phylum, class);
            let details = vec![
                LineageEntry::new("Bacteria", "superkingdom"),
                LineageEntry::new(format!("Phylum{}", phylum), "phylum"),
                LineageEntry::new(format!("Class{}_{}", phylum, class), "class"),
            ];
            hierarchy
                .feed(&lineage, &details)
                .expect("Error feeding lineage");
        }
    }
    hierarchy
}

fn trie_rebuild_bench(c: &mut Criterion) {
    let mut hierarchy = populated_hierarchy();
    c.bench_function("build_multifurcating_trie", move |b| {
        b.iter(|| {
            hierarchy
                .build_multifurcating_trie(true, false)
                .expect("Error rebuilding trie")
        });
    });
}

fn projection_bench(c: &mut Criterion) {
    let mut hierarchy = populated_hierarchy();
    hierarchy
        .build_multifurcating_trie(true, false)
        .expect("Error building trie");
    c.bench_function("project_lineage", move |b| {
        b.iter(|| {
            hierarchy
                .project_lineage("d__Bacteria; p__Phylum7; c__Class7_3")
                .expect("Error projecting lineage")
        });
    });
}

criterion_group!(benches, trie_rebuild_bench, projection_bench);
criterion_main!(benches);
