use criterion::{black_box, criterion_group, criterion_main, Criterion};
use quarry_core::prelude::{DataType, Field, Metadata, OrderType, Value};
use quarry_split::{Row, Rows, Split, SplitReader, SplitWriter};

fn keyed_split(rows: usize, seed: u64) -> Split {
    let mut md = Metadata::new(vec![
        Field::new("region", DataType::Utf8),
        Field::new("qty", DataType::Int64),
    ]);
    md.append_key_by_type(DataType::Int64);
    md.append_key_by_type(DataType::Utf8);
    let mut split = Split::new(md).with_orders(vec![OrderType::Desc, OrderType::Asc]);

    // xorshift keeps the input shuffled without pulling in an rng crate
    let mut x = seed | 1;
    for _ in 0..rows {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        let qty = (x % 10_000) as i64;
        let region = format!("region-{}", x % 16);
        split
            .append_row_with_keys(
                vec![Value::Str(region.clone()), Value::I64(qty)],
                vec![Some(Value::I64(qty)), Some(Value::Str(region))],
            )
            .unwrap();
    }
    split
}

fn bench_split_sort(c: &mut Criterion) {
    let split = keyed_split(8192, 0x9e37_79b9);
    c.bench_function("split_sort_8k_two_keys", |b| {
        b.iter(|| {
            let mut s = split.clone();
            s.sort();
            black_box(s.num_rows())
        })
    });
}

fn bench_merge_min(c: &mut Criterion) {
    let inputs: Vec<Split> = (0..8)
        .map(|i| {
            let mut s = keyed_split(1024, 17 + i);
            s.sort();
            s
        })
        .collect();
    let orders = vec![OrderType::Desc, OrderType::Asc];

    c.bench_function("merge_8_way_1k_each", |b| {
        b.iter(|| {
            let mut pos = vec![0usize; inputs.len()];
            let mut rows = Rows::with_slots(inputs.len(), orders.clone());
            let fill = |i: usize, pos: &mut [usize], rows: &mut Rows| {
                if pos[i] < inputs[i].num_rows() {
                    let (keys, flags) = inputs[i].key_row(pos[i]);
                    rows.set(i, Some(Row::new(inputs[i].row(pos[i]), keys, flags)));
                    pos[i] += 1;
                }
            };
            for i in 0..inputs.len() {
                fill(i, &mut pos, &mut rows);
            }
            let mut out = 0usize;
            while let Some(i) = rows.min() {
                black_box(rows.take(i));
                out += 1;
                fill(i, &mut pos, &mut rows);
            }
            out
        })
    });
}

fn bench_stream_round_trip(c: &mut Criterion) {
    let split = keyed_split(8192, 7);
    c.bench_function("split_stream_8k_rows_batch_1k", |b| {
        b.iter(|| {
            let mut writer = SplitWriter::new(Vec::new(), 1024);
            writer.write_metadata(&split.metadata).unwrap();
            writer.write_split(&split).unwrap();
            let bytes = writer.finish().unwrap();
            let mut reader = SplitReader::new(bytes.as_slice());
            reader.read_metadata().unwrap();
            black_box(reader.read_all().unwrap().num_rows())
        })
    });
}

criterion_group!(benches, bench_split_sort, bench_merge_min, bench_stream_round_trip);
criterion_main!(benches);
