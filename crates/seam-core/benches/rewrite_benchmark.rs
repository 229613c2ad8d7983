use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use seam_core::{
    parse_unit, BuildSession, CompilationUnit, Injector, Pipeline, Runtime, SeamConfig, UnitIndex,
    Value,
};

/// One opted-in class with `methods` methods, each calling the previous one
/// and reading a static field
fn generated_unit(methods: usize, classes: usize) -> CompilationUnit {
    let mut source = String::new();
    for c in 0..classes {
        source.push_str(&format!("@Instrument\nclass Gen{c} {{\n    static int base = 3;\n"));
        source.push_str("    int m0(int x) { return x + base; }\n");
        for m in 1..methods {
            source.push_str(&format!(
                "    int m{m}(int x) {{ int y = m{}(x + 1); return y * 2 + base; }}\n",
                m - 1
            ));
        }
        source.push_str("}\n");
    }
    parse_unit(&source).unwrap()
}

fn bench_instrument_class(c: &mut Criterion) {
    let mut group = c.benchmark_group("instrument_class");
    for methods in [10, 50, 200] {
        let unit = generated_unit(methods, 1);
        let index = UnitIndex::new(&unit).with_opted_in(["Gen0".to_string()]);
        let class = &unit.classes[0];
        group.bench_with_input(BenchmarkId::from_parameter(methods), &methods, |b, _| {
            b.iter(|| {
                let result = Injector::new(&index).instrument_class(black_box(class)).unwrap();
                black_box(result.manifest.len())
            })
        });
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    let unit = generated_unit(50, 8);
    let config = SeamConfig::default();
    let pipeline = Pipeline::new(config.clone());

    group.bench_function("sequential", |b| {
        b.iter(|| {
            let mut session = BuildSession::new(config.clone());
            black_box(pipeline.process_unit(&mut session, black_box(&unit)).site_count())
        })
    });

    group.bench_function("parallel", |b| {
        b.iter(|| {
            let mut session = BuildSession::new(config.clone());
            black_box(
                pipeline
                    .process_classes_parallel(&mut session, black_box(&unit))
                    .site_count(),
            )
        })
    });

    group.finish();
}

fn bench_guarded_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("guarded_eval");
    let unit = generated_unit(20, 1);

    let plain = Runtime::with_config(SeamConfig {
        load_time_instrumentation: false,
        ..SeamConfig::default()
    });
    plain.load_unit(&unit).unwrap();
    let plain_object = plain.instantiate("Gen0", vec![]).unwrap();

    let instrumented = Runtime::new();
    instrumented.load_unit(&unit).unwrap();
    let instrumented_object = instrumented.instantiate("Gen0", vec![]).unwrap();

    group.bench_function("plain", |b| {
        b.iter(|| {
            plain
                .call_method(&plain_object, "m19", vec![Value::Integer(black_box(1))])
                .unwrap()
        })
    });

    group.bench_function("empty_table", |b| {
        b.iter(|| {
            instrumented
                .call_method(&instrumented_object, "m19", vec![Value::Integer(black_box(1))])
                .unwrap()
        })
    });

    instrumented
        .overrides()
        .when("Gen0#m19(int)/call:Gen0.m18(int)#0")
        .returns(7);
    group.bench_function("overridden", |b| {
        b.iter(|| {
            instrumented
                .call_method(&instrumented_object, "m19", vec![Value::Integer(black_box(1))])
                .unwrap()
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_instrument_class,
    bench_pipeline,
    bench_guarded_evaluation
);
criterion_main!(benches);
