use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use lispkit::Interpreter;
use lispkit::scheme::parse;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

const SYMBOLS: &[&str] = &["define", "lambda", "if", "x", "acc", "+", "car", "#:key", "set!"];

/// Random source text of nested forms; the seed keeps runs comparable
fn generate_source(rng: &mut StdRng, forms: usize, max_depth: usize) -> String {
    let mut out = String::new();
    for _ in 0..forms {
        write_form(rng, max_depth, &mut out);
        out.push('\n');
    }
    out
}

fn write_form(rng: &mut StdRng, depth: usize, out: &mut String) {
    match rng.gen_range(0..10) {
        0..=5 if depth > 0 => {
            let (open, close) = if rng.gen_bool(0.8) { ('(', ')') } else { ('[', ']') };
            out.push(open);
            for i in 0..rng.gen_range(0..6) {
                if i > 0 {
                    out.push(' ');
                }
                write_form(rng, depth - 1, out);
            }
            out.push(close);
        }
        6 => out.push_str(&rng.gen_range(0..100_000).to_string()),
        7 => out.push_str("\"some text\\n\""),
        8 if depth > 0 => {
            out.push('\'');
            write_form(rng, depth - 1, out);
        }
        _ => out.push_str(SYMBOLS[rng.gen_range(0..SYMBOLS.len())]),
    }
}

fn bench_reader(c: &mut Criterion) {
    let mut group = c.benchmark_group("reader");
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for (forms, depth) in [(10, 4), (100, 6), (1000, 8)] {
        let source = generate_source(&mut rng, forms, depth);
        group.throughput(Throughput::Bytes(source.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("nested_forms", format!("{forms}x{depth}")),
            &source,
            |b, source| b.iter(|| black_box(parse(source).unwrap())),
        );
    }

    let wide = format!("({})", (0..1000).map(|i| i.to_string()).collect::<Vec<_>>().join(" "));
    group.bench_function("wide_list_1000", |b| {
        b.iter(|| black_box(parse(&wide).unwrap()));
    });

    group.finish();
}

fn bench_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluation");
    let program = "(define (fib n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2))))) (fib 15)";

    group.bench_function("fib_15", |b| {
        b.iter(|| black_box(Interpreter::default().run(program).unwrap()));
    });

    let keywords = "(define (f a (b 2) #:scale (s 10) . rest) (* s (+ a b (length rest))))
                    (define i 0)
                    (while (< i 200) (f i #:scale 3) (f i 1 2 3) (set! i (+ i 1)))";
    group.bench_function("keyword_calls_200", |b| {
        b.iter(|| black_box(Interpreter::default().run(keywords).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_reader, bench_evaluation);
criterion_main!(benches);
