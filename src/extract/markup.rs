//! Structural queries over the rendered post page.

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Node, Selector};
use url::Url;

use super::counts::count_or_zero;
use super::parse_timestamp;
use crate::browser::{collapse_whitespace, parse_selector, DomView};
use crate::links::MAX_HANDLE_LEN;

pub(super) const ARTICLE: &str = "article[data-testid='tweet']";

/// Interstitials that replace the post: login walls, captchas, rate limits.
const CHALLENGE_SELECTORS: &[(&str, &str)] = &[
    ("input[autocomplete='username']", "login form"),
    ("[data-testid='LoginForm_Login_Button']", "login form"),
    ("iframe[src*='arkoselabs']", "captcha iframe"),
    ("iframe[src*='challenges.cloudflare.com']", "captcha iframe"),
    ("#challenge-form", "captcha form"),
];

const CHALLENGE_TEXTS: &[&str] = &[
    "rate limit exceeded",
    "something went wrong. try reloading.",
    "unusual activity",
    "verify you are human",
];

const NOT_FOUND_SELECTORS: &[(&str, &str)] = &[
    ("[data-testid='error-detail']", "error state"),
    ("[data-testid='emptyState']", "empty state"),
];

const NOT_FOUND_TEXTS: &[&str] = &[
    "this post is unavailable",
    "this page doesn't exist",
    "this post was deleted",
    "this account doesn't exist",
    "age-restricted",
    "these posts are protected",
    "account suspended",
    "from a suspended account",
];

/// Paths the site redirects logged-out or flagged sessions to.
const LOGIN_PATHS: &[&str] = &["/i/flow/login", "/login", "/account/access"];

/// Whether the page ended up on a login or account-check flow.
pub(super) fn is_login_redirect(final_url: &str) -> bool {
    Url::parse(final_url)
        .map(|url| LOGIN_PATHS.contains(&url.path().trim_end_matches('/')))
        .unwrap_or(false)
}

/// Selectors whose presence means the page finished rendering.
pub(super) fn ready_selectors() -> Vec<String> {
    std::iter::once(ARTICLE)
        .chain(CHALLENGE_SELECTORS.iter().map(|(css, _)| *css))
        .chain(NOT_FOUND_SELECTORS.iter().map(|(css, _)| *css))
        .map(str::to_string)
        .collect()
}

/// Fields read from the post article.
#[derive(Debug, Clone, Default)]
pub(super) struct DomPost {
    pub text: String,
    pub username: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub reply_count: u64,
    pub like_count: u64,
    pub retweet_count: u64,
}

/// Read the article of post `id`.
///
/// Some layouts omit the permalink on the focal post, so a lone article
/// without any permalink is accepted too. An article whose permalink points
/// at another post never stands in for `id`.
pub(super) fn find_post(dom: &DomView, id: u64) -> Option<DomPost> {
    let articles = dom.all(ARTICLE);

    let permalink = parse_selector(&format!("a[href*='/status/{}']", id))?;
    let any_permalink = parse_selector("a[href*='/status/']")?;
    let time = parse_selector("time[datetime]")?;

    let article = match articles
        .iter()
        .copied()
        .find(|a| permalink_time(*a, &permalink, &time).is_some())
    {
        Some(article) => article,
        None => {
            let [only] = articles.as_slice() else {
                return None;
            };
            if permalink_time(*only, &any_permalink, &time).is_some() {
                return None;
            }
            *only
        }
    };

    let created_at = permalink_time(article, &permalink, &time)
        .or_else(|| article.select(&time).next())
        .and_then(|t| t.value().attr("datetime"))
        .and_then(parse_timestamp);

    let text = first_in(article, "[data-testid='tweetText']")
        .map(rich_text)
        .unwrap_or_default();

    let username = first_in(article, "[data-testid='User-Name'] a[href]")
        .and_then(|a| a.value().attr("href"))
        .and_then(handle_from_href);

    Some(DomPost {
        text,
        username,
        created_at,
        reply_count: counter(article, "[data-testid='reply']"),
        like_count: counter(article, "[data-testid='like'], [data-testid='unlike']"),
        retweet_count: counter(
            article,
            "[data-testid='retweet'], [data-testid='unretweet']",
        ),
    })
}

/// Lowercased body text with typographic apostrophes folded.
pub(super) fn normalized_body_text(dom: &DomView) -> String {
    dom.body_text().to_lowercase().replace('\u{2019}', "'")
}

pub(super) fn challenge_marker(dom: &DomView, body_text: &str) -> Option<String> {
    marker(dom, body_text, CHALLENGE_SELECTORS, CHALLENGE_TEXTS)
}

pub(super) fn not_found_marker(dom: &DomView, body_text: &str) -> Option<String> {
    marker(dom, body_text, NOT_FOUND_SELECTORS, NOT_FOUND_TEXTS)
}

fn marker(
    dom: &DomView,
    body_text: &str,
    selectors: &[(&str, &str)],
    texts: &[&str],
) -> Option<String> {
    selectors
        .iter()
        .find(|(css, _)| dom.exists(css))
        .map(|(_, label)| label.to_string())
        .or_else(|| {
            texts
                .iter()
                .find(|t| body_text.contains(*t))
                .map(|t| format!("page says \"{}\"", t))
        })
}

fn permalink_time<'a>(
    article: ElementRef<'a>,
    permalink: &Selector,
    time: &Selector,
) -> Option<ElementRef<'a>> {
    article
        .select(permalink)
        .find_map(|link| link.select(time).next())
}

fn first_in<'a>(element: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let selector = parse_selector(css)?;
    element.select(&selector).next()
}

/// Text content with emoji images replaced by their alt text.
fn rich_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if el.name() == "img" => {
                if let Some(alt) = el.attr("alt") {
                    out.push_str(alt);
                }
            }
            _ => {}
        }
    }
    out.trim().to_string()
}

fn counter(article: ElementRef<'_>, css: &str) -> u64 {
    match first_in(article, css) {
        Some(button) => {
            let text = collapse_whitespace(&button.text().collect::<String>());
            count_or_zero(button.value().attr("aria-label"), Some(&text))
        }
        None => 0,
    }
}

fn handle_from_href(href: &str) -> Option<String> {
    let handle = href.trim_start_matches('/').split(['/', '?']).next()?;
    let valid = !handle.is_empty()
        && handle.len() <= MAX_HANDLE_LEN
        && handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| handle.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::RenderedDocument;

    fn dom(html: &str) -> DomView {
        RenderedDocument::new("https://x.com/alice/status/111", html).dom()
    }

    const THREAD: &str = r#"<html><body>
      <article data-testid="tweet">
        <div data-testid="User-Name"><a href="/parent">Parent</a></div>
        <a href="/parent/status/100"><time datetime="2024-01-01T00:00:00.000Z">Jan 1</time></a>
        <div data-testid="tweetText">earlier post</div>
      </article>
      <article data-testid="tweet">
        <div data-testid="User-Name"><a href="/Alice">Alice</a><a href="/Alice">@Alice</a></div>
        <div data-testid="tweetText"><span>hello </span><img alt="🎉" src="e.svg"><span> world</span></div>
        <a href="/Alice/status/111"><time datetime="2024-11-10T12:30:00.000Z">Nov 10</time></a>
        <button data-testid="reply" aria-label="5 Replies. Reply"><span>5</span></button>
        <button data-testid="unretweet"><span>1.2K</span></button>
        <button data-testid="like" aria-label="Like"><span>3M</span></button>
      </article>
    </body></html>"#;

    #[test]
    fn picks_the_article_linking_to_the_post() {
        let post = find_post(&dom(THREAD), 111).unwrap();
        assert_eq!(post.text, "hello 🎉 world");
        assert_eq!(post.username.as_deref(), Some("Alice"));
        assert_eq!(
            post.created_at.map(|d| d.to_rfc3339()),
            Some("2024-11-10T12:30:00+00:00".to_string())
        );
        assert_eq!(post.reply_count, 5);
        assert_eq!(post.retweet_count, 1_200);
        assert_eq!(post.like_count, 3_000_000);
    }

    #[test]
    fn missing_counters_are_zero() {
        let html = r#"<article data-testid="tweet">
            <time datetime="2024-11-10T12:30:00Z"></time>
        </article>"#;
        let post = find_post(&dom(html), 111).unwrap();
        assert_eq!(
            (post.reply_count, post.like_count, post.retweet_count),
            (0, 0, 0)
        );
        assert!(post.username.is_none());
        assert!(post.created_at.is_some());
        assert_eq!(post.text, "");
    }

    #[test]
    fn other_posts_never_stand_in_for_the_requested_one() {
        let withheld = r#"<html><body>
          <article data-testid="tweet">
            <div data-testid="User-Name"><a href="/parent">Parent</a></div>
            <a href="/parent/status/100"><time datetime="2024-01-01T00:00:00.000Z">Jan 1</time></a>
            <div data-testid="tweetText">someone else's post</div>
          </article>
          <div><span>This post is unavailable.</span></div>
        </body></html>"#;
        assert!(find_post(&dom(withheld), 111).is_none());

        // Parent plus an unrelated reply, neither linking to 111
        let thread = THREAD.replace("/Alice/status/111", "/Alice/status/112");
        assert!(find_post(&dom(&thread), 111).is_none());
    }

    #[test]
    fn no_article_means_no_post() {
        assert!(find_post(&dom("<p>nothing</p>"), 111).is_none());
    }

    #[test]
    fn detects_markers() {
        let login = dom(r#"<form><input autocomplete="username"></form>"#);
        let body = normalized_body_text(&login);
        assert_eq!(challenge_marker(&login, &body).as_deref(), Some("login form"));
        assert!(not_found_marker(&login, &body).is_none());

        let gone = dom("<body><span>Hmm\u{2026}this page doesn\u{2019}t exist.</span></body>");
        let body = normalized_body_text(&gone);
        assert!(challenge_marker(&gone, &body).is_none());
        assert!(not_found_marker(&gone, &body).is_some());
    }

    #[test]
    fn login_redirects() {
        assert!(is_login_redirect("https://x.com/i/flow/login?redirect_after_login=%2F"));
        assert!(is_login_redirect("https://x.com/account/access"));
        assert!(!is_login_redirect("https://x.com/alice/status/111"));
        assert!(!is_login_redirect("https://x.com/loginbot/status/111"));
        assert!(!is_login_redirect("not a url"));
    }

    #[test]
    fn handles_from_links() {
        assert_eq!(handle_from_href("/alice").as_deref(), Some("alice"));
        assert_eq!(handle_from_href("/bob/status/1").as_deref(), Some("bob"));
        assert_eq!(handle_from_href("/"), None);
        assert_eq!(handle_from_href("/not-a-handle"), None);
    }
}
