use criterion::{criterion_group, criterion_main, Criterion};

use mimeconv::config::Config;
use mimeconv::model::mime::{BodyPart, Headers, Message, MimeNode, Multipart};
use mimeconv::tnef::TnefBuilder;
use mimeconv::visitor::{run_converters, ConversionContext, ConverterServices, VisitorRegistry};

fn sample_message() -> Message {
    let tnef = TnefBuilder::new()
        .message_class("IPM.Note")
        .subject("Status")
        .body("Weekly status attached.")
        .attachment("status.txt", &b"all green\r\n".repeat(512))
        .build();

    let mut mixed = Multipart::new("mixed");
    mixed.add_part(MimeNode::Leaf(BodyPart::new(
        "text/plain",
        b"See the attachment.\r\n".to_vec(),
    )));
    mixed.add_part(MimeNode::Leaf(BodyPart::new("application/ms-tnef", tnef)));
    Message::new(Headers::new(), MimeNode::Multipart(mixed))
}

fn bench_tnef_conversion(c: &mut Criterion) {
    let config = Config::default();
    let registry =
        VisitorRegistry::from_config(&config, &ConverterServices::from_config(&config, None));
    let ctx = ConversionContext::new();
    let message = sample_message();

    c.bench_function("convert_tnef_message", |b| {
        b.iter(|| run_converters(&registry, &ctx, message.clone()).unwrap().modified)
    });
}

fn bench_noop_traversal(c: &mut Criterion) {
    let config = Config::default();
    let registry =
        VisitorRegistry::from_config(&config, &ConverterServices::from_config(&config, None));
    let ctx = ConversionContext::new();

    let mut mixed = Multipart::new("mixed");
    for i in 0..200 {
        mixed.add_part(MimeNode::Leaf(BodyPart::new(
            "application/octet-stream",
            vec![i as u8; 64],
        )));
    }
    let message = Message::new(Headers::new(), MimeNode::Multipart(mixed));

    c.bench_function("traverse_wide_multipart", |b| {
        b.iter(|| run_converters(&registry, &ctx, message.clone()).unwrap().modified)
    });
}

criterion_group!(benches, bench_tnef_conversion, bench_noop_traversal);
criterion_main!(benches);
