// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Class Graph Benchmark
//!
//! Measures marshaling cost of class graphs:
//! - Wide graphs (one node referencing many leaves, half of them shared)
//! - Deep chains close to the default nesting limit
//! - Slicing of values the receiver does not know
//!
//! Each case runs for both encodings and, where it matters, both formats.

#![allow(clippy::uninlined_format_args)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use frost::encoding::{
    EncodingVersion, FormatType, InputStream, OutputStream, TypeRegistry, Value, ValueGraph,
    ValueRef, ENCODING_1_1, ENCODING_2_0,
};
use frost::Result;

const LEAF: &str = "::Bench::Leaf";
const NODE: &str = "::Bench::Node";
const RICH_LEAF: &str = "::Bench::RichLeaf";

#[derive(Debug, Default)]
struct Leaf {
    id: i32,
    next: Option<ValueRef>,
}

impl Leaf {
    fn read_members(&mut self, input: &mut InputStream<'_>) -> Result<()> {
        input.start_slice()?;
        self.id = input.read_int()?;
        self.next = input.read_nullable_class(Some(LEAF))?;
        input.end_slice()
    }

    fn write_members(&self, output: &mut OutputStream<'_>) -> Result<()> {
        output.start_slice(LEAF, None, true)?;
        output.write_int(self.id);
        output.write_nullable_class(self.next, Some(LEAF))?;
        output.end_slice()
    }
}

impl Value for Leaf {
    fn type_ids(&self) -> &'static [&'static str] {
        &[LEAF]
    }

    fn read_slices(&mut self, input: &mut InputStream<'_>) -> Result<()> {
        self.read_members(input)
    }

    fn write_slices(&self, output: &mut OutputStream<'_>) -> Result<()> {
        self.write_members(output)
    }
}

/// Leaf subclass carrying a payload the receiver may not know.
#[derive(Debug, Default)]
struct RichLeaf {
    leaf: Leaf,
    payload: Vec<u8>,
}

impl Value for RichLeaf {
    fn type_ids(&self) -> &'static [&'static str] {
        &[RICH_LEAF, LEAF]
    }

    fn read_slices(&mut self, input: &mut InputStream<'_>) -> Result<()> {
        input.start_slice()?;
        self.payload = input.read_byte_seq()?;
        input.end_slice()?;
        self.leaf.read_members(input)
    }

    fn write_slices(&self, output: &mut OutputStream<'_>) -> Result<()> {
        output.start_slice(RICH_LEAF, None, false)?;
        output.write_byte_seq(&self.payload);
        output.end_slice()?;
        self.leaf.write_members(output)
    }
}

#[derive(Debug, Default)]
struct Node {
    children: Vec<Option<ValueRef>>,
}

impl Value for Node {
    fn type_ids(&self) -> &'static [&'static str] {
        &[NODE]
    }

    fn read_slices(&mut self, input: &mut InputStream<'_>) -> Result<()> {
        input.start_slice()?;
        let count = input.read_and_check_seq_size(1)?;
        self.children = (0..count)
            .map(|_| input.read_nullable_class(Some(LEAF)))
            .collect::<Result<_>>()?;
        input.end_slice()
    }

    fn write_slices(&self, output: &mut OutputStream<'_>) -> Result<()> {
        output.start_slice(NODE, None, true)?;
        output.write_size(self.children.len());
        for child in &self.children {
            output.write_nullable_class(*child, Some(LEAF))?;
        }
        output.end_slice()
    }
}

fn new_leaf() -> Box<dyn Value> {
    Box::<Leaf>::default()
}

fn new_rich_leaf() -> Box<dyn Value> {
    Box::<RichLeaf>::default()
}

fn new_node() -> Box<dyn Value> {
    Box::<Node>::default()
}

fn registry(with_rich: bool) -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register_value(LEAF, new_leaf).register_value(NODE, new_node);
    if with_rich {
        registry.register_value(RICH_LEAF, new_rich_leaf);
    }
    registry
}

/// One node with `width` children; every other child repeats the previous one.
fn wide_graph(width: usize, rich: bool) -> (ValueGraph, ValueRef) {
    let mut graph = ValueGraph::new();
    let mut children = Vec::with_capacity(width);
    let mut last = None;
    for i in 0..width {
        if i % 2 == 1 {
            children.push(last);
            continue;
        }
        let leaf = Leaf { id: i as i32, next: None };
        let child = if rich {
            graph.add(RichLeaf {
                leaf,
                payload: vec![i as u8; 32],
            })
        } else {
            graph.add(leaf)
        };
        last = Some(child);
        children.push(last);
    }
    let root = graph.add(Node { children });
    (graph, root)
}

fn chain(length: usize) -> (ValueGraph, ValueRef) {
    let mut graph = ValueGraph::new();
    let mut next = None;
    for id in (0..length).rev() {
        next = Some(graph.add(Leaf { id: id as i32, next }));
    }
    let head = next.unwrap_or_else(|| graph.add(Leaf::default()));
    (graph, head)
}

fn encode(graph: &ValueGraph, root: ValueRef, formal: &str, encoding: EncodingVersion, format: FormatType) -> Vec<u8> {
    let mut out = OutputStream::new(encoding).with_format(format).with_graph(graph);
    out.write_encapsulation(Some(encoding), |out| out.write_class(root, Some(formal)))
        .expect("encode");
    out.finished()
}

fn decode(bytes: &[u8], formal: &str, registry: &TypeRegistry) -> ValueGraph {
    let mut input = InputStream::new(bytes, ENCODING_1_1, registry);
    let (_, graph) = input
        .read_encapsulation(|input| input.read_class(Some(formal)))
        .expect("decode");
    graph
}

fn label(encoding: EncodingVersion, format: FormatType) -> String {
    format!("{}.{}/{:?}", encoding.major, encoding.minor, format)
}

/// Benchmark: encode and decode a node referencing many leaves
fn bench_wide_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("class_graph_wide");
    let registry = registry(true);

    for width in [16usize, 256, 2048] {
        let (graph, root) = wide_graph(width, false);
        group.throughput(Throughput::Elements(width as u64));
        for encoding in [ENCODING_1_1, ENCODING_2_0] {
            for format in [FormatType::Compact, FormatType::Sliced] {
                let id = format!("{}/{}", label(encoding, format), width);
                group.bench_with_input(BenchmarkId::new("encode", &id), &width, |b, _| {
                    b.iter(|| black_box(encode(&graph, root, NODE, encoding, format)));
                });

                let bytes = encode(&graph, root, NODE, encoding, format);
                group.bench_with_input(BenchmarkId::new("decode", &id), &width, |b, _| {
                    b.iter(|| black_box(decode(black_box(&bytes), NODE, &registry)));
                });
            }
        }
    }
    group.finish();
}

/// Benchmark: decode a chain of nested instances
fn bench_deep_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("class_graph_deep");
    let registry = registry(false);

    for length in [8usize, 64, 96] {
        let (graph, head) = chain(length);
        for encoding in [ENCODING_1_1, ENCODING_2_0] {
            let bytes = encode(&graph, head, LEAF, encoding, FormatType::Compact);
            let id = format!("{}/{}", label(encoding, FormatType::Compact), length);
            group.bench_with_input(BenchmarkId::new("decode", &id), &length, |b, _| {
                b.iter(|| black_box(decode(black_box(&bytes), LEAF, &registry)));
            });
        }
    }
    group.finish();
}

/// Benchmark: decode values whose most-derived slice must be skipped
fn bench_slicing(c: &mut Criterion) {
    let mut group = c.benchmark_group("class_graph_slicing");
    let known = registry(true);
    let unknown = registry(false);
    let (graph, root) = wide_graph(256, true);

    for encoding in [ENCODING_1_1, ENCODING_2_0] {
        let bytes = encode(&graph, root, NODE, encoding, FormatType::Sliced);
        let id = label(encoding, FormatType::Sliced);
        group.bench_with_input(BenchmarkId::new("known", &id), &bytes, |b, bytes| {
            b.iter(|| black_box(decode(black_box(bytes), NODE, &known)));
        });
        group.bench_with_input(BenchmarkId::new("sliced", &id), &bytes, |b, bytes| {
            b.iter(|| black_box(decode(black_box(bytes), NODE, &unknown)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_wide_graph, bench_deep_chain, bench_slicing);
criterion_main!(benches);
