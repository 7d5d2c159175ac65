use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kforge_core::BuildProgress;
use kforge_schema::{HardwareSignals, KernelConfig, ProfileCatalog, ProfileId};

fn compiler_output(lines: usize) -> Vec<String> {
    (0..lines)
        .map(|i| match i % 4 {
            0 => format!("  CC      drivers/gpu/drm/amd/amdgpu/file_{i}.o"),
            1 => format!("  CC [M]  fs/btrfs/file_{i}.o"),
            2 => format!("  LD [M]  net/netfilter/mod_{i}.ko"),
            _ => "make[3]: Nothing to be done for 'all'.".to_owned(),
        })
        .collect()
}

fn distro_config(entries: usize) -> String {
    let mut text = String::from("#\n# Automatically generated file; DO NOT EDIT.\n#\n");
    for i in 0..entries {
        if i % 5 == 0 {
            text.push_str(&format!("# CONFIG_OPTION_{i} is not set\n"));
        } else {
            text.push_str(&format!("CONFIG_OPTION_{i}=m\n"));
        }
    }
    text
}

fn bench_progress_observe(c: &mut Criterion) {
    let lines = compiler_output(10_000);
    c.bench_function("build_progress_observe_10k_lines", |b| {
        b.iter(|| {
            let mut progress = BuildProgress::new(20_000);
            for line in &lines {
                black_box(progress.observe(line));
            }
            progress.last_percent()
        });
    });
}

fn bench_apply_profile(c: &mut Criterion) {
    let text = distro_config(10_000);
    let catalog = ProfileCatalog::new(&HardwareSignals::default());
    let profile = catalog.get(ProfileId::Gaming);
    c.bench_function("kconfig_parse_apply_render_10k", |b| {
        b.iter(|| {
            let mut config = KernelConfig::parse(black_box(&text));
            config.apply(profile);
            config.render()
        });
    });
}

criterion_group!(benches, bench_progress_observe, bench_apply_profile);
criterion_main!(benches);
