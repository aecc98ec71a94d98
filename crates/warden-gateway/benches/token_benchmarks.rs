//! Performance benchmarks for the auth core.
//!
//! Run with: cargo bench -p warden-gateway

use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tempfile::TempDir;
use warden_core::SigningSecret;
use warden_gateway::auth::{
    AuthGateway, AuthStores, TokenIssuer, TokenPurpose, User, UserRepository,
};

fn issuer() -> TokenIssuer {
    TokenIssuer::new(&SigningSecret::generate(), "warden", Duration::from_secs(3600))
}

/// Benchmark token signing and verification.
fn bench_tokens(c: &mut Criterion) {
    let issuer = issuer();
    let (token, _) = issuer.issue("bench@x.com").unwrap();

    c.bench_function("token_issue", |b| {
        b.iter(|| issuer.issue(black_box("bench@x.com")).unwrap());
    });

    c.bench_function("token_validate", |b| {
        b.iter(|| issuer.validate(black_box(&token)).unwrap());
    });
}

/// Benchmark full authentication against a populated deny-list.
fn bench_authenticate(c: &mut Criterion) {
    let mut group = c.benchmark_group("authenticate");

    for revoked in [0usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("revoked", revoked), &revoked, |b, &n| {
            let temp_dir = TempDir::new().unwrap();
            let stores = AuthStores::open(temp_dir.path()).unwrap();
            stores
                .users
                .insert(&User::new("bench@x.com", "password123", "Bench", "User").unwrap())
                .unwrap();

            let expires = chrono::Utc::now() + chrono::Duration::hours(1);
            for i in 0..n {
                stores.revocations.revoke(&format!("{i:032x}"), expires).unwrap();
            }

            let gateway = AuthGateway::new(
                Arc::new(issuer()),
                stores.revocations.clone(),
                stores.users.clone(),
                stores.rbac.clone(),
            );
            let (token, _) = gateway.issuer().issue("bench@x.com").unwrap();

            b.iter(|| gateway.authenticate(black_box(&token)).unwrap());
        });
    }

    group.finish();
}

/// Benchmark single-use token creation and consumption.
fn bench_single_use(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let stores = AuthStores::open(temp_dir.path()).unwrap();

    c.bench_function("single_use_create_consume", |b| {
        b.iter(|| {
            let token = stores
                .single_use
                .create("bench@x.com", TokenPurpose::PasswordReset, Duration::from_secs(600))
                .unwrap();
            stores
                .single_use
                .consume(black_box(&token.token), TokenPurpose::PasswordReset)
                .unwrap()
        });
    });
}

/// Benchmark permission checks through several roles.
fn bench_has_permission(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let stores = AuthStores::open(temp_dir.path()).unwrap();

    for i in 0..10 {
        stores.rbac.assign_role("bench@x.com", &format!("role-{i}")).unwrap();
    }
    stores.rbac.grant("role-9", "items", "read").unwrap();

    c.bench_function("has_permission_last_role", |b| {
        b.iter(|| {
            stores
                .rbac
                .has_permission(black_box("bench@x.com"), "items", "read")
                .unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_tokens,
    bench_authenticate,
    bench_single_use,
    bench_has_permission
);
criterion_main!(benches);
