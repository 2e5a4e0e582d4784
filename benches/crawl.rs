use criterion::{Criterion, black_box, criterion_group, criterion_main};
use depspider::config::SpiderConfig;
use depspider::spider::Spider;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const LAYERS: usize = 6;
const PER_LAYER: usize = 20;

/// Layered TS workspace: every module imports two modules of the next layer
/// and calls their exports, so crawls fan out and symbol queries have
/// callers to find.
fn synthetic_workspace() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    for layer in 0..LAYERS {
        let layer_dir = root.join(format!("layer{layer}"));
        std::fs::create_dir_all(&layer_dir).unwrap();
        for idx in 0..PER_LAYER {
            let mut source = String::new();
            let mut body = String::from("  let total = 0;\n");
            if layer + 1 < LAYERS {
                for offset in 0..2 {
                    let next = (idx + offset) % PER_LAYER;
                    source.push_str(&format!(
                        "import {{ run{n}_{next} }} from '../layer{n}/mod{next}';\n",
                        n = layer + 1
                    ));
                    body.push_str(&format!("  total += run{n}_{next}();\n", n = layer + 1));
                }
            }
            source.push_str(&format!(
                "\nexport function run{layer}_{idx}(): number {{\n{body}  return total + {idx};\n}}\n"
            ));
            std::fs::write(layer_dir.join(format!("mod{idx}.ts")), source).unwrap();
        }
    }
    (dir, root)
}

fn spider_for(root: &Path) -> Spider {
    let mut config = SpiderConfig::new(root);
    config.enable_file_watcher = false;
    Spider::with_default_parsers(config).unwrap()
}

fn bench_full_index(c: &mut Criterion) {
    let (_dir, root) = synthetic_workspace();
    c.bench_function("full_index_cold", |b| {
        b.iter(|| {
            let mut spider = spider_for(&root);
            let summary = spider.build_full_index(|_| {}).unwrap();
            black_box(summary.indexed_files);
        })
    });
}

fn bench_crawl(c: &mut Criterion) {
    let (_dir, root) = synthetic_workspace();
    let entry = root.join("layer0/mod0.ts");
    let mut spider = spider_for(&root);
    spider.build_full_index(|_| {}).unwrap();

    let mut group = c.benchmark_group("crawl_warm_cache");
    for depth in [2usize, 4, LAYERS] {
        group.bench_with_input(format!("depth_{depth}"), &depth, |b, &depth| {
            b.iter(|| {
                let result = spider.crawl(&entry, depth).unwrap();
                black_box(result.nodes.len());
            })
        });
    }
    group.finish();
}

fn bench_symbol_dependents(c: &mut Criterion) {
    let (_dir, root) = synthetic_workspace();
    let target = root.join(format!("layer{}/mod0.ts", LAYERS - 1));
    let name = format!("run{}_0", LAYERS - 1);
    let mut spider = spider_for(&root);
    spider.build_full_index(|_| {}).unwrap();

    c.bench_function("symbol_dependents", |b| {
        b.iter(|| {
            let dependents = spider.get_symbol_dependents(&target, &name).unwrap();
            black_box(dependents.runtime_count);
        })
    });
}

criterion_group!(
    benches,
    bench_full_index,
    bench_crawl,
    bench_symbol_dependents
);
criterion_main!(benches);
