use rt_cache::prelude::*;
use rt_cache::test::{FallbackCounter, FaultyClient, Unserializable, User};
use std::sync::Arc;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn memory_cache() -> Result<(Arc<MemoryTaggedClient>, ReadThroughCache<MemoryTaggedClient>)> {
    let client = Arc::new(MemoryTaggedClient::builder().build()?);
    let cache = ReadThroughCache::<MemoryTaggedClient>::builder()
        .client(Arc::clone(&client))
        .name("users")
        .build()?;
    Ok((client, cache))
}

fn faulty_cache(policy: WriteFailurePolicy) -> Result<(Arc<FaultyClient>, ReadThroughCache<FaultyClient>)> {
    let client = Arc::new(FaultyClient::new());
    let cache = ReadThroughCache::<FaultyClient>::builder()
        .client(Arc::clone(&client))
        .write_failure_policy(policy)
        .build()?;
    Ok((client, cache))
}

fn must_not_run() -> std::future::Ready<std::result::Result<User, std::io::Error>> {
    panic!("fallback must not run on a hit")
}

fn user_tags() -> TagSet {
    TagSet::from(["user", "region:eu"])
}

#[tokio::test]
async fn user_is_populated_then_served_from_cache() -> Result<()> {
    let (client, cache) = memory_cache()?;
    let counter = FallbackCounter::default();

    let mut out = User::default();
    let outcome = cache
        .read_through("user:42", &user_tags(), &mut out, counter.returning(User::ada()))
        .await?;
    assert_eq!(outcome, Outcome::Populated);
    assert_eq!(out, User::ada());
    assert!(client.contains_key("user:42"));

    let mut again = User::default();
    let outcome = cache
        .read_through("user:42", &user_tags(), &mut again, counter.failing())
        .await?;
    assert_eq!(outcome, Outcome::Hit);
    assert_eq!(again, User::ada());
    assert_eq!(counter.calls(), 1, "second call must not reach the source");

    Ok(())
}

#[tokio::test]
async fn empty_tags_are_rejected_before_io() -> Result<()> {
    let (client, cache) = faulty_cache(WriteFailurePolicy::Strict)?;
    let counter = FallbackCounter::default();

    let mut out = User::default();
    let err = cache
        .read_through("user:42", &TagSet::default(), &mut out, counter.returning(User::ada()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(err.to_string(), "invalid argument: empty tag set");
    assert_eq!(counter.calls(), 0);
    assert_eq!(client.get_calls(), 0);
    assert_eq!(client.set_calls(), 0);
    assert_eq!(out, User::default());
    Ok(())
}

#[tokio::test]
async fn hit_never_invokes_fallback() -> Result<()> {
    let (client, cache) = memory_cache()?;
    client
        .set("user:42", PostcardCodec.encode(&User::ada())?, &user_tags())
        .await?;

    let mut out = User::default();
    let outcome = cache
        .read_through("user:42", &user_tags(), &mut out, must_not_run)
        .await?;

    assert_eq!(outcome, Outcome::Hit);
    assert_eq!(out, User::ada());
    Ok(())
}

#[tokio::test]
async fn failing_fallback_leaves_cache_untouched() -> Result<()> {
    let (client, cache) = memory_cache()?;
    let counter = FallbackCounter::default();

    let mut out = User::default();
    let err = cache
        .read_through("user:7", &user_tags(), &mut out, counter.failing())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceFetch);
    assert_eq!(err.key(), Some("user:7"));
    assert_eq!(err.tags(), Some(&user_tags()));
    assert_eq!(counter.calls(), 1);
    assert_eq!(out, User::default());
    assert!(client.get("user:7", &user_tags()).await.unwrap_err().is_cache_miss());
    Ok(())
}

#[tokio::test]
async fn read_error_skips_fallback() -> Result<()> {
    let (client, cache) = faulty_cache(WriteFailurePolicy::Strict)?;
    client.fail_get(true);
    let counter = FallbackCounter::default();

    let mut out = User::default();
    let err = cache
        .read_through("user:42", &user_tags(), &mut out, counter.returning(User::ada()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CacheRead);
    assert_eq!(err.to_string(), "failed to get cache(key=user:42, tags=[user region:eu])");
    assert!(matches!(
        err,
        ReadThroughError::CacheRead {
            source: rt_cache::test::FaultyError::Transport,
            ..
        }
    ));
    assert_eq!(counter.calls(), 0);
    assert_eq!(client.set_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn unserializable_value_is_neither_cached_nor_bound() -> Result<()> {
    let (client, cache) = faulty_cache(WriteFailurePolicy::Strict)?;

    let mut out = Unserializable::default();
    let err = cache
        .read_through("handle:1", &TagSet::from(["handle"]), &mut out, || async {
            Ok::<_, std::io::Error>(Unserializable { handle: 7 })
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Encode);
    assert_eq!(out.handle, 0);
    assert_eq!(client.set_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn corrupted_entry_is_a_decode_error_not_a_miss() -> Result<()> {
    let (client, cache) = memory_cache()?;
    client.set("user:42", Vec::new(), &user_tags()).await?;
    let counter = FallbackCounter::default();

    let mut out = User::default();
    let err = cache
        .read_through("user:42", &user_tags(), &mut out, counter.returning(User::ada()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Decode);
    assert!(matches!(
        err,
        ReadThroughError::Decode {
            source: CodecError::Postcard(_),
            ..
        }
    ));
    assert_eq!(counter.calls(), 0);
    assert_eq!(out, User::default());
    Ok(())
}

#[tokio::test]
async fn strict_write_failure_discards_value() -> Result<()> {
    let (client, cache) = faulty_cache(WriteFailurePolicy::Strict)?;
    client.fail_set(true);
    let counter = FallbackCounter::default();

    let mut out = User::default();
    let err = cache
        .read_through("user:42", &user_tags(), &mut out, counter.returning(User::ada()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CacheWrite);
    assert_eq!(counter.calls(), 1);
    assert_eq!(client.set_calls(), 1);
    assert_eq!(out, User::default());
    Ok(())
}

#[tokio::test]
async fn best_effort_write_failure_returns_value() -> Result<()> {
    let (client, cache) = faulty_cache(WriteFailurePolicy::BestEffort)?;
    client.fail_set(true);
    let counter = FallbackCounter::default();

    let mut out = User::default();
    let outcome = cache
        .read_through("user:42", &user_tags(), &mut out, counter.returning(User::ada()))
        .await?;

    assert_eq!(outcome, Outcome::Populated);
    assert_eq!(out, User::ada());
    assert!(!client.inner().contains_key("user:42"));
    Ok(())
}

#[tokio::test]
async fn fetch_returns_the_value() -> Result<()> {
    let (_client, cache) = memory_cache()?;
    let scores: Vec<u32> = cache
        .fetch("scores", &TagSet::from(["scores"]), || async { Ok::<_, std::io::Error>(vec![3, 1, 2]) })
        .await?;
    assert_eq!(scores, vec![3, 1, 2]);

    let cached: Vec<u32> = cache
        .fetch("scores", &TagSet::from(["scores"]), || async {
            Err::<Vec<u32>, _>("source is down")
        })
        .await?;
    assert_eq!(cached, vec![3, 1, 2]);
    Ok(())
}

#[tokio::test]
async fn json_codec_round_trips_through_the_cache() -> Result<()> {
    let client = Arc::new(MemoryTaggedClient::builder().build()?);
    let cache = ReadThroughCache::<MemoryTaggedClient, JsonCodec>::builder()
        .client(Arc::clone(&client))
        .build()?;

    let mut out = User::default();
    cache
        .read_through("user:42", &user_tags(), &mut out, || async { Ok::<_, std::io::Error>(User::ada()) })
        .await?;

    let raw = client.get("user:42", &user_tags()).await?;
    assert_eq!(serde_json::from_slice::<serde_json::Value>(&raw)?["name"], "Ada");
    Ok(())
}
