//! Benchmarks for Ailydian cryptographic operations

use ailydian_crypto::{
    aead::{Aead, AeadAlgorithm, AeadKey},
    identity::IdentityKeyPair,
    kdf::chain_step,
    keys::{generate_signed_pre_key, KeyPair},
    ratchet::{initialize_ratchet, RatchetLimits, RatchetState},
    safety::generate_safety_number,
    x3dh::{initiate_x3dh, X3dhBundle},
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const INFO: &[u8] = b"Ailydian-E2EE-v1";

fn bench_key_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Key Generation");

    group.bench_function("identity_keypair", |b| {
        b.iter(|| black_box(IdentityKeyPair::generate().unwrap()))
    });

    group.bench_function("x25519_keypair", |b| {
        b.iter(|| black_box(KeyPair::generate().unwrap()))
    });

    let identity = IdentityKeyPair::generate().unwrap();
    group.bench_function("signed_pre_key", |b| {
        b.iter(|| black_box(generate_signed_pre_key(&identity, 1).unwrap()))
    });

    group.finish();
}

fn bench_x3dh(c: &mut Criterion) {
    let alice = IdentityKeyPair::generate().unwrap();
    let bob = IdentityKeyPair::generate().unwrap();
    let spk = generate_signed_pre_key(&bob, 1).unwrap();
    let bundle = X3dhBundle {
        identity_key: bob.public_key(),
        signed_pre_key_id: spk.id,
        signed_pre_key: spk.key_pair.public_key(),
        signed_pre_key_signature: spk.signature,
        one_time_pre_key: None,
    };
    let ephemeral = KeyPair::generate().unwrap();

    c.bench_function("x3dh_initiate", |b| {
        b.iter(|| black_box(initiate_x3dh(&alice, &bundle, &ephemeral, INFO).unwrap()))
    });
}

fn bench_chain(c: &mut Criterion) {
    let chain_key = [0x42u8; 32];
    c.bench_function("chain_step", |b| b.iter(|| black_box(chain_step(&chain_key))));
}

fn bench_aead(c: &mut Criterion) {
    let mut group = c.benchmark_group("AEAD");
    let key = AeadKey::from_bytes([0x42; 32]);

    for algorithm in [AeadAlgorithm::Aes256Gcm, AeadAlgorithm::XChaCha20Poly1305] {
        let cipher = Aead::new(algorithm);
        for size in [64usize, 1024, 16384] {
            let plaintext = vec![0x42u8; size];
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", algorithm), size),
                &plaintext,
                |b, pt| b.iter(|| black_box(cipher.seal(&key, pt, b"aad").unwrap())),
            );
        }
    }

    group.finish();
}

fn bench_ratchet(c: &mut Criterion) {
    let seed = initialize_ratchet(&[7u8; 64]).unwrap();
    let ephemeral = KeyPair::generate().unwrap();
    let alice = RatchetState::initiator(&seed, ephemeral.clone(), RatchetLimits::default());
    let bob = RatchetState::responder(
        &seed,
        KeyPair::generate().unwrap(),
        ephemeral.public_key(),
        RatchetLimits::default(),
    );
    let (_, message) = alice.encrypt(&[0u8; 256], b"ad").unwrap();

    let mut group = c.benchmark_group("Ratchet");
    group.bench_function("encrypt_256", |b| {
        b.iter(|| black_box(alice.encrypt(&[0u8; 256], b"ad").unwrap()))
    });
    group.bench_function("decrypt_256", |b| {
        b.iter(|| black_box(bob.decrypt(&message, b"ad").unwrap()))
    });
    group.finish();
}

fn bench_safety_number(c: &mut Criterion) {
    let a = [0x11u8; 64];
    let b = [0xEEu8; 64];
    c.bench_function("safety_number", |bench| {
        bench.iter(|| black_box(generate_safety_number(&a, &b, "alice", "bob")))
    });
}

criterion_group!(
    benches,
    bench_key_generation,
    bench_x3dh,
    bench_chain,
    bench_aead,
    bench_ratchet,
    bench_safety_number
);
criterion_main!(benches);
