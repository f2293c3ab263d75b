use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use digest_common::{FetchMethod, Source, SourceTier};
use digest_sources::{
    FeedFetcher, FetcherRegistry, ForumFetcher, PageFetcher, SourceFetcher, VideoChannelFetcher,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn source(url: String, method: FetchMethod, config: serde_json::Value) -> Source {
    Source {
        id: uuid::Uuid::new_v4(),
        name: "Test source".into(),
        url,
        tier: SourceTier::Tier1,
        category: "operations".into(),
        fetch_method: method,
        fetch_config: config,
        active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn rss(items: &[(&str, &str)]) -> String {
    let now = Utc::now().to_rfc2822();
    let body: String = items
        .iter()
        .map(|(title, link)| {
            format!(
                "<item><title>{title}</title><link>{link}</link>\
                 <description>About {title}</description><pubDate>{now}</pubDate></item>"
            )
        })
        .collect();
    format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title>{body}</channel></rss>"#)
}

#[tokio::test]
async fn feed_fetcher_reads_items() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[
            ("First", "https://blog.example/1"),
            ("Second", "https://blog.example/2"),
        ])))
        .mount(&server)
        .await;

    let fetcher = FeedFetcher::new(TIMEOUT).unwrap();
    let src = source(format!("{}/feed.xml", server.uri()), FetchMethod::Rss, json!({}));
    let articles = fetcher.fetch(&src).await.unwrap();

    assert_eq!(articles.len(), 2);
    assert_eq!(articles[0].title, "First");
    assert_eq!(articles[1].content, "About Second");
}

#[tokio::test]
async fn registry_applies_limit_and_swallows_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[
            ("A", "https://blog.example/a"),
            ("B", "https://blog.example/b"),
            ("C", "https://blog.example/c"),
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let registry = FetcherRegistry::new(TIMEOUT).unwrap();

    let limited = source(format!("{}/feed.xml", server.uri()), FetchMethod::Rss, json!({"limit": 2}));
    assert_eq!(registry.fetch(&limited).await.unwrap().len(), 2);

    let broken = source(format!("{}/broken.xml", server.uri()), FetchMethod::Rss, json!({}));
    assert!(registry.fetch(&broken).await.unwrap().is_empty());
    assert!(registry.probe(&broken).await.is_err());
}

#[tokio::test]
async fn forum_fetcher_skips_stickied_and_low_score_posts() {
    let server = MockServer::start().await;
    let created = Utc::now().timestamp() as f64;
    Mock::given(method("GET"))
        .and(path("/r/operations/top.json"))
        .and(query_param("t", "month"))
        .and(query_param("limit", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"children": [
                {"data": {"title": "Rules", "selftext": "", "permalink": "/r/operations/rules",
                          "created_utc": created, "stickied": true, "score": 900}},
                {"data": {"title": "Shift swaps that work", "selftext": "We moved to a board.",
                          "permalink": "/r/operations/abc", "created_utc": created, "stickied": false, "score": 40}},
                {"data": {"title": "Low effort", "selftext": "meh",
                          "permalink": "/r/operations/def", "created_utc": created, "stickied": false, "score": 1}}
            ]}
        })))
        .mount(&server)
        .await;

    let fetcher = ForumFetcher::new(TIMEOUT).unwrap().with_base_url(server.uri());
    let src = source(
        "https://www.reddit.com/r/operations".into(),
        FetchMethod::Reddit,
        json!({"minScore": 10}),
    );
    let articles = fetcher.fetch(&src).await.unwrap();

    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0].title, "Shift swaps that work");
    assert_eq!(articles[0].url, format!("{}/r/operations/abc", server.uri()));
    assert_eq!(articles[0].content, "We moved to a board.");
}

#[tokio::test]
async fn video_fetcher_uses_configured_channel_id() {
    let server = MockServer::start().await;
    let atom = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:media="http://search.yahoo.com/mrss/">
  <title>Channel</title>
  <entry>
    <id>yt:video:1</id>
    <title>Training walkthrough</title>
    <link rel="alternate" href="https://www.youtube.com/watch?v=1"/>
    <published>{}</published>
    <media:group><media:description>Step by step onboarding.</media:description></media:group>
  </entry>
</feed>"#,
        Utc::now().to_rfc3339()
    );
    Mock::given(method("GET"))
        .and(path("/feeds/videos.xml"))
        .and(query_param("channel_id", "UCtest"))
        .respond_with(ResponseTemplate::new(200).set_body_string(atom))
        .mount(&server)
        .await;

    let fetcher = VideoChannelFetcher::new(TIMEOUT)
        .unwrap()
        .with_feed_base(format!("{}/feeds/videos.xml", server.uri()));
    let src = source(
        "https://www.youtube.com/@training".into(),
        FetchMethod::Youtube,
        json!({"channelId": "UCtest"}),
    );
    let articles = fetcher.fetch(&src).await.unwrap();

    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0].url, "https://www.youtube.com/watch?v=1");
    assert_eq!(articles[0].content, "Step by step onboarding.");
}

#[tokio::test]
async fn page_fetcher_follows_matching_links() {
    let server = MockServer::start().await;
    let index = r#"<html><body>
        <a href="/posts/one">One</a>
        <a href="/posts/two#comments">Two</a>
        <a href="/about">About</a>
    </body></html>"#;
    Mock::given(method("GET"))
        .and(path("/blog"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index))
        .mount(&server)
        .await;
    for slug in ["one", "two"] {
        Mock::given(method("GET"))
            .and(path(format!("/posts/{slug}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "<html><head><title>Post {slug}</title></head><body><article><p>Body of {slug}.</p></article></body></html>"
            )))
            .mount(&server)
            .await;
    }

    let fetcher = PageFetcher::new(TIMEOUT).unwrap();
    let src = source(format!("{}/blog", server.uri()), FetchMethod::Web, json!({"linkPattern": "/posts/"}));
    let articles = fetcher.fetch(&src).await.unwrap();

    let titles: Vec<_> = articles.iter().map(|a| a.title.as_str()).collect();
    assert_eq!(titles, vec!["Post one", "Post two"]);
    assert!(articles.iter().all(|a| !a.url.contains('#')));
}

#[tokio::test]
async fn registry_strategy_can_be_replaced() {
    struct Fixed;

    #[async_trait::async_trait]
    impl SourceFetcher for Fixed {
        async fn fetch(&self, source: &Source) -> anyhow::Result<Vec<digest_common::Article>> {
            Ok(vec![digest_common::Article {
                url: format!("{}/only", source.url),
                title: "Only".into(),
                content: "text".into(),
                published_at: None,
            }])
        }
    }

    let registry = FetcherRegistry::new(TIMEOUT)
        .unwrap()
        .with(FetchMethod::Web, Arc::new(Fixed));
    let src = source("https://site.example".into(), FetchMethod::Web, json!({}));
    let articles = registry.fetch(&src).await.unwrap();
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0].url, "https://site.example/only");
}
