//! The built-in product catalog: NOAA SPC/WPC graphics, NWS text products
//! served over FTP and the FAA ATCSCC operations advisory.

use super::{
    Catalog, DirectItem, Fanout, IndexPage, IndexUnit, Locator, LocatorBuild, OutputFormat,
    ProductSpec, ReplaceItem, Strategy, SubIndex,
};
use crate::extract::{AttributeFilter, ExtractionRule};

pub const WPC_BASE: &str = "https://www.wpc.ncep.noaa.gov";
pub const SPC_OUTLOOK_BASE: &str = "https://www.spc.noaa.gov/products/outlook";
pub const NWS_FTP_HOST: &str = "tgftp.nws.noaa.gov";

const ZONE_FORECAST_DIR: &str = "data/forecasts/zone";
const DISCUSSION_DIR: &str = "data/raw/fx";
const METAR_DIR: &str = "data/observations/metar/stations";

/// State directory and zone ids for the zone forecast.
const FORECAST_ZONES: &[(&str, &[&str])] = &[("md", &["mdz014"])];
const FORECAST_DISCUSSIONS: &[&str] = &["fxus61.klwx.afd.lwx"];
const METAR_STATIONS: &[&str] = &["KIAD", "KDCA", "KBWI"];

const OPS_ADVISORY_URL: &str = "https://www.fly.faa.gov/adv/adv_spt.jsp";

pub fn catalog() -> Catalog {
    Catalog {
        products: vec![
            surface_analysis(),
            convective_outlook(),
            convective_outlook_simple(),
            fire_outlook(),
            national_forecast_chart(),
            short_range_forecast(),
            snowfall_composite(),
            qpf(),
            zone_forecast(),
            forecast_discussion(),
            metar(),
            ops_advisory(),
        ],
    }
}

fn http(url: impl Into<String>) -> Locator {
    Locator::Http { url: url.into() }
}

fn ftp(directory: &str, file: String) -> Locator {
    Locator::Ftp {
        host: NWS_FTP_HOST.to_string(),
        directory: format!("/{}", directory),
        file,
    }
}

fn surface_analysis() -> ProductSpec {
    ProductSpec {
        id: "sfc_analysis".to_string(),
        stem: "sfc_analysis".to_string(),
        format: OutputFormat::Png,
        enabled: true,
        strategy: Strategy::Direct {
            items: vec![DirectItem {
                sub: None,
                locator: http(format!("{}/sfc/namussfcwbg.jpg", WPC_BASE)),
            }],
        },
    }
}

/// The outlook page names the valid time of the current image, which is
/// published as `dayNotlk_HHMM.gif` next to the page.
fn convective_outlook() -> ProductSpec {
    ProductSpec {
        id: "conv_outlook".to_string(),
        stem: "conv_outlk".to_string(),
        format: OutputFormat::Gif,
        enabled: true,
        strategy: Strategy::Scraped {
            pages: (1..=2)
                .map(|day| IndexPage {
                    url: format!("{}/day{}otlk.html", SPC_OUTLOOK_BASE, day),
                    sub: Some(SubIndex::Day(day)),
                })
                .collect(),
            rule: ExtractionRule::Text {
                container: Some("td.zz".to_string()),
                pattern: r"\d{4} (\d{4}) UTC Day".to_string(),
            },
            build: LocatorBuild::Suffix {
                strip: ".html".to_string(),
                suffix: "_{token}.gif".to_string(),
            },
            fanout: Fanout::PerPage,
        },
    }
}

/// Latest outlook image without resolving the valid time.
fn convective_outlook_simple() -> ProductSpec {
    ProductSpec {
        id: "conv_outlook_simple".to_string(),
        stem: "conv_outlk_latest".to_string(),
        format: OutputFormat::Gif,
        enabled: false,
        strategy: Strategy::Templated {
            template: format!("{}/day{{n}}otlk.gif", SPC_OUTLOOK_BASE),
            unit: IndexUnit::Day,
            range: vec![1, 2],
        },
    }
}

fn fire_outlook() -> ProductSpec {
    ProductSpec {
        id: "fire_outlook".to_string(),
        stem: "fire_outlk".to_string(),
        format: OutputFormat::Gif,
        enabled: true,
        strategy: Strategy::Templated {
            template: "https://www.spc.noaa.gov/products/fire_wx/day{n}otlk_fire.gif".to_string(),
            unit: IndexUnit::Day,
            range: vec![1, 2],
        },
    }
}

/// The chart page embeds the day 1 image with a cache-busting query; days 2
/// and 3 share it with a different image name.
fn national_forecast_chart() -> ProductSpec {
    ProductSpec {
        id: "natl_fcst_chart".to_string(),
        stem: "nat_fcst_chart".to_string(),
        format: OutputFormat::Gif,
        enabled: true,
        strategy: Strategy::Scraped {
            pages: vec![IndexPage {
                url: format!("{}/national_forecast/natfcst.php", WPC_BASE),
                sub: None,
            }],
            rule: ExtractionRule::Attribute {
                selector: "img".to_string(),
                attribute: "src".to_string(),
                filter: None,
                pattern: r"/noaa/noaad\d\.gif\?\d+".to_string(),
            },
            build: LocatorBuild::Join {
                base: None,
                path: "{token}".to_string(),
            },
            fanout: Fanout::Replace {
                from: "noaad1".to_string(),
                items: (1..=3)
                    .map(|day| ReplaceItem {
                        sub: SubIndex::Day(day),
                        to: format!("noaad{}", day),
                    })
                    .collect(),
            },
        },
    }
}

/// Thumbnails on the surface forecast page are named `<image>_sm.gif`; the
/// first four valid-time images cover hours 6 through 24.
fn short_range_forecast() -> ProductSpec {
    ProductSpec {
        id: "shrt_rng_fcst".to_string(),
        stem: "shrt_rng".to_string(),
        format: OutputFormat::Gif,
        enabled: true,
        strategy: Strategy::Scraped {
            pages: vec![IndexPage {
                url: format!("{}/basicwx/basic_sfcjpg.shtml", WPC_BASE),
                sub: None,
            }],
            rule: ExtractionRule::Attribute {
                selector: "img".to_string(),
                attribute: "src".to_string(),
                filter: Some(AttributeFilter {
                    attribute: "alt".to_string(),
                    pattern: r"\d{1,2}-hour fcst valid \d{2} or \d{2} UTC".to_string(),
                }),
                pattern: r"/(\w+)_sm".to_string(),
            },
            build: LocatorBuild::Join {
                base: Some(format!("{}/basicwx/", WPC_BASE)),
                path: "{token}.gif".to_string(),
            },
            fanout: Fanout::FirstN {
                items: [6, 12, 18, 24].into_iter().map(SubIndex::Hour).collect(),
            },
        },
    }
}

fn snowfall_composite() -> ProductSpec {
    ProductSpec {
        id: "snow_composite".to_string(),
        stem: "snow_comp".to_string(),
        format: OutputFormat::Gif,
        enabled: true,
        strategy: Strategy::Templated {
            template: format!("{}/wwd/day{{n}}_composite.gif", WPC_BASE),
            unit: IndexUnit::Day,
            range: vec![1, 2, 3],
        },
    }
}

/// Disabled until the image behind each day's anchor is confirmed against
/// the live site.
fn qpf() -> ProductSpec {
    let pages = ["qpf1.shtml", "day2.shtml", "day3.shtml"]
        .iter()
        .zip(1..)
        .map(|(page, day)| IndexPage {
            url: format!("{}/qpf/{}", WPC_BASE, page),
            sub: Some(SubIndex::Day(day)),
        })
        .collect();

    ProductSpec {
        id: "qpf".to_string(),
        stem: "qpf".to_string(),
        format: OutputFormat::Gif,
        enabled: false,
        strategy: Strategy::Scraped {
            pages,
            rule: ExtractionRule::Attribute {
                selector: "a#day{n}".to_string(),
                attribute: "href".to_string(),
                filter: None,
                pattern: r".+".to_string(),
            },
            build: LocatorBuild::Join {
                base: None,
                path: "{token}".to_string(),
            },
            fanout: Fanout::PerPage,
        },
    }
}

fn zone_forecast() -> ProductSpec {
    let items = FORECAST_ZONES
        .iter()
        .flat_map(|(state, zones)| {
            zones.iter().map(move |zone| DirectItem {
                sub: Some(SubIndex::Name(zone.to_string())),
                locator: ftp(
                    &format!("{}/{}", ZONE_FORECAST_DIR, state),
                    format!("{}.txt", zone),
                ),
            })
        })
        .collect();

    ProductSpec {
        id: "zone_forecast".to_string(),
        stem: "zone_forecast".to_string(),
        format: OutputFormat::Text,
        enabled: true,
        strategy: Strategy::Direct { items },
    }
}

fn forecast_discussion() -> ProductSpec {
    ProductSpec {
        id: "forecast_discussion".to_string(),
        stem: "forecast_discussion".to_string(),
        format: OutputFormat::Text,
        enabled: true,
        strategy: Strategy::Direct {
            items: FORECAST_DISCUSSIONS
                .iter()
                .map(|disc| DirectItem {
                    sub: Some(SubIndex::Name(disc.to_string())),
                    locator: ftp(DISCUSSION_DIR, format!("{}.txt", disc)),
                })
                .collect(),
        },
    }
}

fn metar() -> ProductSpec {
    ProductSpec {
        id: "metar".to_string(),
        stem: "metar".to_string(),
        format: OutputFormat::Text,
        enabled: true,
        strategy: Strategy::Direct {
            items: METAR_STATIONS
                .iter()
                .map(|station| DirectItem {
                    sub: Some(SubIndex::Name(station.to_string())),
                    // Station files are upper-case on the server.
                    locator: ftp(METAR_DIR, format!("{}.TXT", station)),
                })
                .collect(),
        },
    }
}

fn ops_advisory() -> ProductSpec {
    ProductSpec {
        id: "ops_advisory".to_string(),
        stem: "ops_advisory".to_string(),
        format: OutputFormat::PreText,
        enabled: true,
        strategy: Strategy::Direct {
            items: vec![DirectItem {
                sub: None,
                locator: http(OPS_ADVISORY_URL),
            }],
        },
    }
}
