use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dbug_core::{Anchor, AnchorTypeDef, ConfigTemplate, Dbug};
use dbug_expr::{ClassBuilder, HostObject, Type, TypeRegistry, Value};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct Job;

impl HostObject for Job {
    fn type_name(&self) -> &str {
        "Job"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn setup(configs: usize) -> (Dbug, Anchor) {
    let mut registry = TypeRegistry::new();
    registry.register(ClassBuilder::new("Job").build());
    let dbug = Dbug::new(Arc::new(registry));
    let jobs = dbug
        .declare(
            AnchorTypeDef::builder("bench", Type::class("Job"))
                .external_dynamic("progress", Type::int())
                .external_dynamic("retries", Type::int())
                .external_dynamic("note", Type::string()),
        )
        .unwrap();
    // Half of the configs read `progress`, the other half only `retries`.
    dbug.set_templates(
        (0..configs)
            .map(|i| {
                let template = ConfigTemplate::new("Job").id(&format!("c{i}"));
                if i % 2 == 0 {
                    template
                        .variable("scaled", "progress * 3")
                        .condition(&format!("scaled > {i}"))
                } else {
                    template.condition(&format!("retries < {i}"))
                }
            })
            .collect(),
    );
    let anchor = jobs.debug(Value::object(Job)).build().unwrap();
    (dbug, anchor)
}

fn bench_dynamic_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_dynamic_value");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(3));

    for configs in [1usize, 16, 128] {
        let (_dbug, anchor) = setup(configs);

        group.bench_with_input(BenchmarkId::new("dependent", configs), &configs, |b, _| {
            let mut progress = 0i32;
            b.iter(|| {
                progress = progress.wrapping_add(1) % 1_000;
                anchor.set_dynamic_value("progress", black_box(progress)).unwrap();
            })
        });

        group.bench_with_input(BenchmarkId::new("unrelated", configs), &configs, |b, _| {
            b.iter(|| {
                anchor.set_dynamic_value("note", black_box("idle")).unwrap();
            })
        });
    }

    group.finish();

    let (_dbug, inert) = {
        let mut registry = TypeRegistry::new();
        registry.register(ClassBuilder::new("Job").build());
        let dbug = Dbug::new(Arc::new(registry));
        let jobs = dbug
            .declare(
                AnchorTypeDef::builder("bench", Type::class("Job"))
                    .external_dynamic("progress", Type::int()),
            )
            .unwrap();
        let anchor = jobs.debug(Value::object(Job)).build().unwrap();
        (dbug, anchor)
    };
    assert!(inert.is_inert());
    c.bench_function("set_dynamic_value/inert", |b| {
        b.iter(|| inert.set_dynamic_value("progress", black_box(7)).unwrap())
    });
}

criterion_group!(benches, bench_dynamic_updates);
criterion_main!(benches);
