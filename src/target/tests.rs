use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{Cache, CacheMethod, Echo, Target, TargetKind, build};
use crate::config::Properties;
use crate::envelope::Request;
use crate::utils::Error;

#[tokio::test]
async fn test_echo_returns_request_payload() {
    let ctx = CancellationToken::new();
    let response = Echo::new()
        .call(
            &ctx,
            Request::new()
                .with_metadata("k", "v")
                .with_data("some-data"),
        )
        .await
        .unwrap();
    assert_eq!(response.data, b"some-data");
    assert_eq!(response.metadata.get("k").unwrap(), "v");
    assert!(!response.is_error);
}

#[tokio::test(start_paused = true)]
async fn test_echo_delay() {
    let started = tokio::time::Instant::now();
    Echo::with_delay(Duration::from_millis(250))
        .call(&CancellationToken::new(), Request::new())
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn test_echo_delay_ends_when_context_is_cancelled() {
    let ctx = CancellationToken::new();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let started = tokio::time::Instant::now();
    let result = Echo::with_delay(Duration::from_secs(60))
        .call(&ctx, Request::new())
        .await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_cache_set_get_delete() {
    let ctx = CancellationToken::new();
    let cache = Cache::new();
    cache
        .call(
            &ctx,
            Request::new()
                .with_metadata("method", "set")
                .with_metadata("key", "a")
                .with_data("1"),
        )
        .await
        .unwrap();
    assert_eq!(cache.len().await, 1);

    let got = cache
        .call(
            &ctx,
            Request::new()
                .with_metadata("method", "get")
                .with_metadata("key", "a"),
        )
        .await
        .unwrap();
    assert_eq!(got.data, b"1");

    cache
        .call(
            &ctx,
            Request::new()
                .with_metadata("method", "delete")
                .with_metadata("key", "a"),
        )
        .await
        .unwrap();
    let missing = cache
        .call(
            &ctx,
            Request::new()
                .with_metadata("method", "get")
                .with_metadata("key", "a"),
        )
        .await;
    assert!(matches!(missing, Err(Error::Target(_))));
}

#[tokio::test]
async fn test_cache_rejects_unknown_method_and_missing_key() {
    let ctx = CancellationToken::new();
    let cache = Cache::new();
    let bad_method = cache
        .call(
            &ctx,
            Request::new()
                .with_metadata("method", "flush")
                .with_metadata("key", "a"),
        )
        .await;
    assert_eq!(
        bad_method.unwrap_err().to_string(),
        "invalid method type: flush"
    );

    let no_key = cache
        .call(&ctx, Request::new().with_metadata("method", "get"))
        .await;
    assert_eq!(no_key.unwrap_err().to_string(), "missing key");
}

#[test]
fn test_cache_method_parse() {
    assert_eq!("get".parse::<CacheMethod>().unwrap(), CacheMethod::Get);
    assert!("GET".parse::<CacheMethod>().is_err());
}

#[test]
fn test_build_known_and_unknown_kinds() {
    assert_eq!(" Echo ".parse::<TargetKind>().unwrap(), TargetKind::Echo);
    assert!(build("echo", &Properties::new()).is_ok());
    assert!(build("cache", &Properties::new()).is_ok());
    assert!(matches!(
        build("redis", &Properties::new()),
        Err(Error::InvalidOptions(_))
    ));
    assert!(build("echo", &Properties::new().with("delay_ms", "-1")).is_err());
}
