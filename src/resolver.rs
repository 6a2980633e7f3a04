//! Turns catalog entries into concrete fetch targets.

use std::path::{Path, PathBuf};

use reqwest::Url;
use slog::{debug, warn, Logger};

use crate::catalog::{
    Fanout, IndexPage, Locator, LocatorBuild, OutputFormat, ProductSpec, Strategy, SubIndex,
    TransferMode,
};
use crate::extract::{self, ExtractionFailure, ExtractionRule};
use crate::naming;
use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone, PartialEq)]
pub struct FetchTarget {
    pub key: String,
    pub locator: Locator,
    pub dest: PathBuf,
    pub format: OutputFormat,
}

impl FetchTarget {
    pub fn mode(&self) -> TransferMode {
        self.format.mode()
    }
}

/// A sub-item that could not be resolved while its siblings could.
#[derive(Debug, Clone, PartialEq)]
pub struct SubItemFailure {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct Resolution {
    pub targets: Vec<FetchTarget>,
    pub failures: Vec<SubItemFailure>,
}

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("index page {url} unavailable: {source}")]
    IndexPage {
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("index page {url} is not usable: {source}")]
    Extraction {
        url: String,
        #[source]
        source: ExtractionFailure,
    },
    #[error("malformed target for {key}: {reason}")]
    MalformedTarget { key: String, reason: String },
    #[error("expected a single index page, found {0}")]
    PageCount(usize),
    #[error("no targets resolved")]
    Empty,
}

pub async fn resolve<T: Transport>(
    product: &ProductSpec,
    transport: &T,
    out_dir: &Path,
    log: &Logger,
) -> Result<Resolution, ResolveError> {
    let ctx = Context {
        product,
        out_dir,
        log,
    };

    let resolution = match &product.strategy {
        Strategy::Direct { items } => {
            let mut resolution = Resolution::default();
            for item in items {
                let target = ctx.target(item.sub.as_ref(), item.locator.clone())?;
                resolution.targets.push(target);
            }
            resolution
        }
        Strategy::Templated {
            template,
            unit,
            range,
        } => {
            let mut resolution = Resolution::default();
            for n in range {
                let sub = unit.sub_index(*n);
                let locator = Locator::Http {
                    url: template.replace("{n}", &n.to_string()),
                };
                resolution.targets.push(ctx.target(Some(&sub), locator)?);
            }
            resolution
        }
        Strategy::Scraped {
            pages,
            rule,
            build,
            fanout,
        } => match fanout {
            Fanout::PerPage => per_page(&ctx, transport, pages, rule, build).await,
            Fanout::FirstN { items } => {
                let (url, content) = single_page(transport, pages).await?;
                let found = extract::candidates(rule, &content, items.len()).map_err(|source| {
                    ResolveError::Extraction {
                        url: url.to_string(),
                        source,
                    }
                })?;

                let mut resolution = Resolution::default();
                for (i, sub) in items.iter().enumerate() {
                    let outcome = match found.get(i) {
                        Some(Some(token)) => built(&ctx, sub, build, &url, token),
                        Some(None) => Err(format!("candidate {} did not match {}", i + 1, rule)),
                        None => Err(format!(
                            "index page listed only {} candidates",
                            found.len()
                        )),
                    };
                    ctx.record(&mut resolution, Some(sub), outcome);
                }
                resolution
            }
            Fanout::Replace { from, items } => {
                let (url, content) = single_page(transport, pages).await?;
                let token = extract::extract(rule, &content).map_err(|source| {
                    ResolveError::Extraction {
                        url: url.to_string(),
                        source,
                    }
                })?;

                let mut resolution = Resolution::default();
                for item in items {
                    let variant = token.replace(from.as_str(), &item.to);
                    let outcome = built(&ctx, &item.sub, build, &url, &variant);
                    ctx.record(&mut resolution, Some(&item.sub), outcome);
                }
                resolution
            }
        },
    };

    if resolution.targets.is_empty() && resolution.failures.is_empty() {
        return Err(ResolveError::Empty);
    }
    Ok(resolution)
}

struct Context<'a> {
    product: &'a ProductSpec,
    out_dir: &'a Path,
    log: &'a Logger,
}

impl Context<'_> {
    fn key(&self, sub: Option<&SubIndex>) -> String {
        naming::product_key(&self.product.stem, sub)
    }

    fn target(&self, sub: Option<&SubIndex>, locator: Locator) -> Result<FetchTarget, ResolveError> {
        let key = self.key(sub);
        check_locator(&locator).map_err(|reason| ResolveError::MalformedTarget {
            key: key.clone(),
            reason,
        })?;
        debug!(self.log, "Resolved {} to {}", key, locator);
        Ok(FetchTarget {
            key,
            locator,
            dest: naming::local_path(self.out_dir, &self.product.stem, sub, self.product.format),
            format: self.product.format,
        })
    }

    fn record(
        &self,
        resolution: &mut Resolution,
        sub: Option<&SubIndex>,
        outcome: Result<FetchTarget, String>,
    ) {
        match outcome {
            Ok(target) => resolution.targets.push(target),
            Err(reason) => {
                let key = self.key(sub);
                warn!(self.log, "Could not resolve {}: {}", key, reason);
                resolution.failures.push(SubItemFailure { key, reason });
            }
        }
    }
}

/// Each page is resolved on its own; one page failing leaves the others intact.
async fn per_page<T: Transport>(
    ctx: &Context<'_>,
    transport: &T,
    pages: &[IndexPage],
    rule: &ExtractionRule,
    build: &LocatorBuild,
) -> Resolution {
    let mut resolution = Resolution::default();
    for page in pages {
        let sub = page.sub.as_ref();
        let outcome = async {
            let url = parse_url(&page.url)?;
            let content = transport
                .get_text(&url)
                .await
                .map_err(|e| e.to_string())?;
            let rule = rule.for_index(sub.and_then(SubIndex::number));
            let token = extract::extract(&rule, &content).map_err(|e| e.to_string())?;
            let url = build_url(build, &url, &token)?;
            ctx.target(sub, Locator::Http { url: url.to_string() })
                .map_err(|e| e.to_string())
        }
        .await;
        ctx.record(&mut resolution, sub, outcome);
    }
    resolution
}

async fn single_page<T: Transport>(
    transport: &T,
    pages: &[IndexPage],
) -> Result<(Url, String), ResolveError> {
    let [page] = pages else {
        return Err(ResolveError::PageCount(pages.len()));
    };
    let url = Url::parse(&page.url).map_err(|e| ResolveError::MalformedTarget {
        key: page.url.clone(),
        reason: e.to_string(),
    })?;
    let content = transport
        .get_text(&url)
        .await
        .map_err(|source| ResolveError::IndexPage {
            url: page.url.clone(),
            source,
        })?;
    Ok((url, content))
}

fn built(
    ctx: &Context<'_>,
    sub: &SubIndex,
    build: &LocatorBuild,
    page: &Url,
    token: &str,
) -> Result<FetchTarget, String> {
    let url = build_url(build, page, token)?;
    ctx.target(Some(sub), Locator::Http { url: url.to_string() })
        .map_err(|e| e.to_string())
}

pub fn build_url(build: &LocatorBuild, page: &Url, token: &str) -> Result<Url, String> {
    match build {
        LocatorBuild::Suffix { strip, suffix } => {
            let page = page.as_str();
            let stem = page.strip_suffix(strip.as_str()).unwrap_or(page);
            parse_url(&format!("{}{}", stem, suffix.replace("{token}", token)))
        }
        LocatorBuild::Join { base, path } => {
            let base = match base {
                Some(base) => parse_url(base)?,
                None => page.clone(),
            };
            base.join(&path.replace("{token}", token))
                .map_err(|e| format!("cannot join {} onto {}: {}", path, base, e))
        }
    }
}

fn parse_url(raw: &str) -> Result<Url, String> {
    Url::parse(raw).map_err(|e| format!("invalid url {}: {}", raw, e))
}

/// Rejects locators without a host or a file name.
fn check_locator(locator: &Locator) -> Result<(), String> {
    match locator {
        Locator::Http { url } => {
            let url = parse_url(url)?;
            if url.host_str().map_or(true, str::is_empty) {
                return Err(format!("{} has no host", url));
            }
            let file = url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .unwrap_or_default();
            if file.is_empty() {
                return Err(format!("{} names no file", url));
            }
            Ok(())
        }
        Locator::Ftp { host, file, .. } => {
            if host.is_empty() {
                return Err("ftp locator has no host".to_string());
            }
            if file.is_empty() {
                return Err(format!("ftp locator on {} names no file", host));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{defaults, Catalog, DirectItem, IndexUnit};
    use crate::test_support::{discard_logger, FakeTransport};

    fn product(catalog: &Catalog, id: &str) -> ProductSpec {
        catalog.get(id).expect("product in catalog").clone()
    }

    fn urls(resolution: &Resolution) -> Vec<String> {
        resolution
            .targets
            .iter()
            .map(|t| t.locator.to_string())
            .collect()
    }

    fn outlook_page(time: &str) -> String {
        format!(
            r#"<table><tr><td class="zz">Valid 061300Z - 071200Z {} {} UTC Day 1 Outlook</td></tr></table>"#,
            "1259", time
        )
    }

    #[tokio::test]
    async fn direct_locators_are_unchanged() {
        let catalog = defaults::catalog();
        let transport = FakeTransport::default();
        for spec in catalog
            .products
            .iter()
            .filter(|p| matches!(p.strategy, Strategy::Direct { .. }))
        {
            let resolution = resolve(spec, &transport, Path::new("out"), &discard_logger())
                .await
                .expect("direct products resolve");
            let Strategy::Direct { items } = &spec.strategy else {
                unreachable!()
            };
            let expected: Vec<Locator> = items.iter().map(|i| i.locator.clone()).collect();
            let actual: Vec<Locator> =
                resolution.targets.iter().map(|t| t.locator.clone()).collect();
            assert_eq!(actual, expected);
        }
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn templated_products_yield_one_target_per_index() {
        let catalog = defaults::catalog();
        let spec = product(&catalog, "fire_outlook");
        let resolution = resolve(&spec, &FakeTransport::default(), Path::new("temp"), &discard_logger())
            .await
            .expect("templated products resolve");

        assert_eq!(
            urls(&resolution),
            vec![
                "https://www.spc.noaa.gov/products/fire_wx/day1otlk_fire.gif",
                "https://www.spc.noaa.gov/products/fire_wx/day2otlk_fire.gif",
            ]
        );
        let dests: Vec<PathBuf> = resolution.targets.iter().map(|t| t.dest.clone()).collect();
        assert_eq!(
            dests,
            vec![
                PathBuf::from("temp/fire_outlk_d1.gif"),
                PathBuf::from("temp/fire_outlk_d2.gif"),
            ]
        );
    }

    #[tokio::test]
    async fn valid_time_is_appended_before_extension() {
        let catalog = defaults::catalog();
        let spec = product(&catalog, "conv_outlook");
        let transport = FakeTransport::default()
            .with_page(
                "https://www.spc.noaa.gov/products/outlook/day1otlk.html",
                &outlook_page("1300"),
            )
            .with_page(
                "https://www.spc.noaa.gov/products/outlook/day2otlk.html",
                &outlook_page("1730"),
            );

        let resolution = resolve(&spec, &transport, Path::new("temp"), &discard_logger())
            .await
            .expect("outlook resolves");
        assert_eq!(
            urls(&resolution),
            vec![
                "https://www.spc.noaa.gov/products/outlook/day1otlk_1300.gif",
                "https://www.spc.noaa.gov/products/outlook/day2otlk_1730.gif",
            ]
        );
        assert!(resolution.failures.is_empty());
    }

    #[tokio::test]
    async fn missing_valid_time_skips_only_that_day() {
        let catalog = defaults::catalog();
        let spec = product(&catalog, "conv_outlook");
        let transport = FakeTransport::default()
            .with_page(
                "https://www.spc.noaa.gov/products/outlook/day1otlk.html",
                r#"<table><tr><td class="zz">Outlook not yet issued</td></tr></table>"#,
            )
            .with_page(
                "https://www.spc.noaa.gov/products/outlook/day2otlk.html",
                &outlook_page("0600"),
            );

        let resolution = resolve(&spec, &transport, Path::new("temp"), &discard_logger())
            .await
            .expect("partial resolution is not an error");
        assert_eq!(
            urls(&resolution),
            vec!["https://www.spc.noaa.gov/products/outlook/day2otlk_0600.gif"]
        );
        assert_eq!(resolution.failures.len(), 1);
        assert_eq!(resolution.failures[0].key, "conv_outlk_d1");
    }

    #[tokio::test]
    async fn short_range_uses_first_four_candidates() {
        let catalog = defaults::catalog();
        let spec = product(&catalog, "shrt_rng_fcst");
        let page = r#"
            <img src="/basicwx/92fndfd_sm.gif" alt="6-hour fcst valid 18 or 00 UTC">
            <img src="/basicwx/94fndfd_sm.gif" alt="12-hour fcst valid 00 or 06 UTC">
            <img src="/basicwx/96fndfd_sm.gif" alt="18-hour fcst valid 06 or 12 UTC">
            <img src="/basicwx/98fndfd_sm.gif" alt="24-hour fcst valid 12 or 18 UTC">
            <img src="/basicwx/99fndfd_sm.gif" alt="30-hour fcst valid 18 or 00 UTC">"#;
        let transport = FakeTransport::default()
            .with_page("https://www.wpc.ncep.noaa.gov/basicwx/basic_sfcjpg.shtml", page);

        let resolution = resolve(&spec, &transport, Path::new("temp"), &discard_logger())
            .await
            .expect("short range resolves");
        assert_eq!(
            urls(&resolution),
            vec![
                "https://www.wpc.ncep.noaa.gov/basicwx/92fndfd.gif",
                "https://www.wpc.ncep.noaa.gov/basicwx/94fndfd.gif",
                "https://www.wpc.ncep.noaa.gov/basicwx/96fndfd.gif",
                "https://www.wpc.ncep.noaa.gov/basicwx/98fndfd.gif",
            ]
        );
        let keys: Vec<&str> = resolution.targets.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["shrt_rng_6", "shrt_rng_12", "shrt_rng_18", "shrt_rng_24"]);
    }

    #[tokio::test]
    async fn short_range_with_fewer_candidates_reports_missing_hours() {
        let catalog = defaults::catalog();
        let spec = product(&catalog, "shrt_rng_fcst");
        let page = r#"
            <img src="/basicwx/92fndfd_sm.gif" alt="6-hour fcst valid 18 or 00 UTC">
            <img src="/basicwx/94fndfd_sm.gif" alt="12-hour fcst valid 00 or 06 UTC">"#;
        let transport = FakeTransport::default()
            .with_page("https://www.wpc.ncep.noaa.gov/basicwx/basic_sfcjpg.shtml", page);

        let resolution = resolve(&spec, &transport, Path::new("temp"), &discard_logger())
            .await
            .expect("partial resolution is not an error");
        assert_eq!(resolution.targets.len(), 2);
        let failed: Vec<&str> = resolution.failures.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(failed, vec!["shrt_rng_18", "shrt_rng_24"]);
    }

    #[tokio::test]
    async fn national_chart_variants_replace_image_name() {
        let catalog = defaults::catalog();
        let spec = product(&catalog, "natl_fcst_chart");
        let page = r#"<img src="/images/wpc.png"><img src="/noaa/noaad1.gif?1586181600">"#;
        let transport = FakeTransport::default().with_page(
            "https://www.wpc.ncep.noaa.gov/national_forecast/natfcst.php",
            page,
        );

        let resolution = resolve(&spec, &transport, Path::new("temp"), &discard_logger())
            .await
            .expect("chart resolves");
        assert_eq!(
            urls(&resolution),
            vec![
                "https://www.wpc.ncep.noaa.gov/noaa/noaad1.gif?1586181600",
                "https://www.wpc.ncep.noaa.gov/noaa/noaad2.gif?1586181600",
                "https://www.wpc.ncep.noaa.gov/noaa/noaad3.gif?1586181600",
            ]
        );
    }

    #[tokio::test]
    async fn unreachable_index_page_fails_the_product() {
        let catalog = defaults::catalog();
        let spec = product(&catalog, "natl_fcst_chart");
        let transport = FakeTransport::default().with_status(
            "https://www.wpc.ncep.noaa.gov/national_forecast/natfcst.php",
            503,
        );

        let result = resolve(&spec, &transport, Path::new("temp"), &discard_logger()).await;
        assert!(matches!(result, Err(ResolveError::IndexPage { .. })));
    }

    #[tokio::test]
    async fn page_without_candidates_fails_the_product() {
        let catalog = defaults::catalog();
        let spec = product(&catalog, "shrt_rng_fcst");
        let transport = FakeTransport::default().with_page(
            "https://www.wpc.ncep.noaa.gov/basicwx/basic_sfcjpg.shtml",
            "<html><body>Maintenance</body></html>",
        );

        let result = resolve(&spec, &transport, Path::new("temp"), &discard_logger()).await;
        assert!(matches!(result, Err(ResolveError::Extraction { .. })));
    }

    #[tokio::test]
    async fn hostless_direct_locator_is_rejected() {
        let spec = ProductSpec {
            id: "broken".to_string(),
            stem: "broken".to_string(),
            format: OutputFormat::Gif,
            enabled: true,
            strategy: Strategy::Direct {
                items: vec![DirectItem {
                    sub: None,
                    locator: Locator::Http {
                        url: "file:///tmp/x.gif".to_string(),
                    },
                }],
            },
        };
        let result = resolve(&spec, &FakeTransport::default(), Path::new("temp"), &discard_logger()).await;
        assert!(matches!(result, Err(ResolveError::MalformedTarget { .. })));
    }

    #[tokio::test]
    async fn templated_hours_are_named_by_hour() {
        let spec = ProductSpec {
            id: "hourly".to_string(),
            stem: "hourly".to_string(),
            format: OutputFormat::Gif,
            enabled: true,
            strategy: Strategy::Templated {
                template: "https://example.test/f{n}.gif".to_string(),
                unit: IndexUnit::Hour,
                range: vec![6, 12, 18, 24],
            },
        };
        let resolution = resolve(&spec, &FakeTransport::default(), Path::new("temp"), &discard_logger())
            .await
            .expect("templated resolves");
        let keys: Vec<&str> = resolution.targets.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["hourly_6", "hourly_12", "hourly_18", "hourly_24"]);
    }

    #[test]
    fn suffix_build_strips_page_extension() {
        let page = Url::parse("https://www.spc.noaa.gov/products/outlook/day1otlk.html")
            .expect("valid url");
        let build = LocatorBuild::Suffix {
            strip: ".html".to_string(),
            suffix: "_{token}.gif".to_string(),
        };
        assert_eq!(
            build_url(&build, &page, "2000").expect("builds").as_str(),
            "https://www.spc.noaa.gov/products/outlook/day1otlk_2000.gif"
        );
    }
}
