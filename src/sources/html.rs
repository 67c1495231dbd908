//! Server-rendered job boards: one card element per posting.

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use super::{clean_tracking_url, is_navigation_artifact, parse_posted, PageContext, ParsedPage};
use crate::models::RawPosting;

const KENYAN_CITIES: &[&str] = &["nairobi", "mombasa", "kisumu", "eldoret", "nakuru", "thika"];

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

/// Flattens an HTML fragment (API descriptions) to plain text.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    collapse_whitespace(&fragment.root_element().text().collect::<Vec<_>>().join(" "))
}

/// Text of the first element matching any selector, tried in priority order.
fn first_text(scope: ElementRef<'_>, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|s| {
        let sel = selector(s)?;
        scope
            .select(&sel)
            .map(element_text)
            .find(|t| !t.is_empty())
    })
}

fn first_attr(scope: ElementRef<'_>, selectors: &[&str], attr: &str) -> Option<String> {
    selectors.iter().find_map(|s| {
        let sel = selector(s)?;
        scope
            .select(&sel)
            .find_map(|el| el.value().attr(attr).map(str::to_string))
    })
}

/// Cards for the first selector that matches anything.
fn cards<'a>(document: &'a Html, selectors: &[&str]) -> Vec<ElementRef<'a>> {
    selectors
        .iter()
        .filter_map(|s| selector(s))
        .map(|sel| document.select(&sel).collect::<Vec<_>>())
        .find(|found| !found.is_empty())
        .unwrap_or_default()
}

fn collect_cards<'a>(
    ctx: &PageContext<'_>,
    cards: Vec<ElementRef<'a>>,
    parse_card: impl Fn(ElementRef<'a>) -> Result<RawPosting, &'static str>,
) -> ParsedPage {
    let mut page = ParsedPage::default();
    for card in cards {
        match parse_card(card) {
            Ok(posting) if is_navigation_artifact(&posting.title) => {
                debug!(source = %ctx.kind, title = %posting.title, "skipping navigation link");
            }
            Ok(posting) => page.postings.push(posting),
            Err(reason) => {
                warn!(source = %ctx.kind, reason, "skipping malformed card");
                page.skipped += 1;
            }
        }
    }
    page
}

fn posting(
    ctx: &PageContext<'_>,
    source_url: String,
    title: String,
    company_name: Option<String>,
    location: Option<String>,
    raw_text: String,
    posted: Option<String>,
    salary_text: Option<String>,
) -> RawPosting {
    RawPosting {
        source: ctx.kind.as_str().to_string(),
        source_url,
        title,
        company_name: company_name.unwrap_or_default(),
        location: location.unwrap_or_default(),
        raw_text,
        posted_at: posted.and_then(|p| parse_posted(&p, ctx.now)),
        salary_text,
    }
}

pub(crate) fn parse_fuzu(body: &str, ctx: &PageContext<'_>) -> ParsedPage {
    let document = Html::parse_document(body);
    let found = cards(&document, &["div.job-card", "div.job-item", "article.job"]);

    collect_cards(ctx, found, |card| {
        let href = first_attr(card, &["a[href]"], "href").ok_or("card has no link")?;
        let url = clean_tracking_url(&href, ctx.base).ok_or("card link is not a url")?;
        let title = first_text(card, &["h2", "h3", "a.job-title", "a"]).ok_or("card has no title")?;

        Ok(posting(
            ctx,
            url,
            title,
            first_text(card, &["span.company-name", "div.company"]),
            first_text(card, &["span.location", "div.job-location"]),
            first_text(card, &["div.job-description", "p.job-snippet"]).unwrap_or_default(),
            first_text(card, &["span.posted-date", "time"]),
            first_text(card, &["span.salary", "div.salary"]),
        ))
    })
}

pub(crate) fn parse_brightermonday(body: &str, ctx: &PageContext<'_>) -> ParsedPage {
    let document = Html::parse_document(body);
    let found = cards(&document, &["article[data-job-id]"]);

    let mut page = collect_cards(ctx, found, |card| {
        let title = first_text(card, &["h1[data-cy='title-job']", "h1", "h2", "h3"])
            .ok_or("card has no title")?;
        let job_key = card.value().attr("data-job-id").unwrap_or_default();

        let link = selector("a[href]").and_then(|sel| {
            card.select(&sel)
                .filter_map(|a| a.value().attr("href"))
                .find(|href| href.contains("/listings/") || href.contains("/job/"))
                .map(str::to_string)
        });
        let url = match link {
            Some(href) => clean_tracking_url(&href, ctx.base),
            None if !job_key.is_empty() => clean_tracking_url(&format!("/job/{job_key}"), ctx.base),
            None => None,
        }
        .ok_or("card has neither link nor id")?;

        // Category headings ("Software & Data") share the h2 style with the employer.
        let company = selector("h2").and_then(|sel| {
            card.select(&sel)
                .map(element_text)
                .find(|t| !t.is_empty() && *t != title && !t.contains('&') && !t.to_lowercase().contains("software"))
        });

        let pieces: Vec<String> = card
            .text()
            .map(collapse_whitespace)
            .filter(|t| !t.is_empty())
            .collect();
        let location = selector("a[href]")
            .and_then(|sel| {
                card.select(&sel)
                    .find(|a| {
                        let href = a.value().attr("href").unwrap_or_default().to_lowercase();
                        KENYAN_CITIES.iter().any(|c| href.contains(&format!("/jobs/{c}")))
                    })
                    .map(element_text)
            })
            .or_else(|| {
                pieces
                    .iter()
                    .find(|p| {
                        let lower = p.to_lowercase();
                        KENYAN_CITIES.iter().any(|c| lower.contains(c)) || lower == "kenya"
                    })
                    .cloned()
            });
        let posted = pieces.iter().find(|p| parse_posted(p, ctx.now).is_some()).cloned();
        let salary = pieces.iter().find(|p| p.to_uppercase().contains("KES")).cloned();
        let employment = selector("a[href*='/jobs/full-time'], a[href*='/jobs/part-time'], a[href*='/jobs/contract'], a[href*='/jobs/temporary']")
            .and_then(|sel| card.select(&sel).next().map(element_text));

        let description = first_text(card, &["[class*='description']", "[class*='summary']"]);
        let raw_text = [description, employment]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n");

        Ok(posting(ctx, url, title, company, location, raw_text, posted, salary))
    });

    let has_next = selector("a[rel='next']").is_some_and(|sel| document.select(&sel).next().is_some());
    page.has_next = Some(has_next);
    page
}

pub(crate) fn parse_indeed(body: &str, ctx: &PageContext<'_>) -> ParsedPage {
    let document = Html::parse_document(body);
    let found = cards(&document, &["div.job_seen_beacon", "div[data-jk]"]);

    collect_cards(ctx, found, |card| {
        let key = card
            .value()
            .attr("data-jk")
            .map(str::to_string)
            .or_else(|| first_attr(card, &["[data-jk]"], "data-jk"))
            .or_else(|| {
                card.value()
                    .attr("id")
                    .and_then(|id| id.strip_prefix("job_"))
                    .map(str::to_string)
            })
            .filter(|k| !k.is_empty())
            .ok_or("card has no job key")?;
        let url = clean_tracking_url(&format!("/viewjob?jk={key}"), ctx.base).ok_or("bad job key")?;
        let title = first_text(card, &["h2.jobTitle", "a.jcs-JobTitle"]).ok_or("card has no title")?;

        Ok(posting(
            ctx,
            url,
            title,
            first_text(card, &["span.companyName", "[data-testid='company-name']"]),
            first_text(card, &["div.companyLocation", "[data-testid='text-location']"]),
            first_text(card, &["div.job-snippet"]).unwrap_or_default(),
            first_text(card, &["span.date"]),
            first_text(card, &["div.salary-snippet", ".salary-snippet-container"]),
        ))
    })
}
