use chrono::NaiveDate;
use tracing::debug;

use crate::core::config::GappsConfig;
use crate::core::error::{Error, ErrorKind, ParseError, Result, ResultExt};
use crate::core::model::{Android, Package, Platform, ReleaseAsset, Variant};
use crate::core::queue::DownloadQueue;
use crate::core::scratch::ScratchFile;

pub const SEPARATOR: &str = "-";
pub const EXTENSION: &str = "zip";

/// How artifact filenames are laid out:
/// `<prefix><sep><platform><sep><android><sep><variant><sep><date>.zip`.
#[derive(Debug, Clone)]
pub struct NameFormat {
    pub prefix: String,
    pub separator: String,
    pub date_format: String,
}

impl NameFormat {
    pub fn from_config(cfg: &GappsConfig) -> Self {
        Self {
            prefix: cfg.prefix.clone(),
            separator: SEPARATOR.to_string(),
            date_format: cfg.time_format.clone(),
        }
    }
}

impl Default for NameFormat {
    fn default() -> Self {
        Self::from_config(&GappsConfig::default())
    }
}

/// Decodes `[platform, android, variant]` tokens.
pub fn parse_package_parts<S: AsRef<str>>(args: &[S]) -> Result<(Platform, Android, Variant), ParseError> {
    if args.len() != 3 {
        return Err(ParseError::Arguments(args.len()));
    }

    let platform = args[0].as_ref().parse::<Platform>()?;
    let android = args[1].as_ref().parse::<Android>()?;
    let variant = args[2].as_ref().parse::<Variant>()?;

    Ok((platform, android, variant))
}

pub fn parse_asset(asset: &ReleaseAsset, md5_sum: &str, format: &NameFormat) -> Result<Package, ParseError> {
    let name = asset.name.as_str();
    if name.is_empty() {
        return Err(ParseError::MissingName);
    }
    if asset.browser_download_url.is_empty() {
        return Err(ParseError::MissingUrl(name.to_string()));
    }

    let lead = format!("{}{}", format.prefix, format.separator);
    let stripped = name.strip_prefix(lead.as_str()).unwrap_or(name);

    let parts: Vec<&str> = stripped.split('.').collect();
    if parts.len() != 3 {
        return Err(ParseError::Name(name.to_string()));
    }
    if parts[2] != EXTENSION {
        return Err(ParseError::Extension(parts[2].to_string()));
    }

    // the android token carries the only dot of the stem
    let stem = format!("{}.{}", parts[0], parts[1]);
    let tokens: Vec<&str> = stem.split(format.separator.as_str()).collect();
    if tokens.len() != 4 {
        return Err(ParseError::Segments { name: name.to_string(), count: tokens.len() });
    }

    let (platform, android, variant) = parse_package_parts(&tokens[..3])?;

    let date = tokens[3];
    NaiveDate::parse_from_str(date, &format.date_format).map_err(|source| ParseError::Date {
        value: date.to_string(),
        format: format.date_format.clone(),
        source,
    })?;

    Ok(Package {
        name: name.to_string(),
        date: date.to_string(),
        origin_url: asset.browser_download_url.clone(),
        local_url: None,
        remote_url: None,
        md5: md5_sum.to_string(),
        size: asset.size,
        platform,
        android,
        variant,
    })
}

/// Extracts the hash from `md5sum` output: `<hex>  <filename>`.
pub fn parse_checksum_sidecar(contents: &str) -> Result<String, ParseError> {
    let sum = contents.split_whitespace().next().unwrap_or_default();
    if sum.is_empty() || !sum.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ParseError::Checksum(contents.trim().to_string()));
    }
    Ok(sum.to_ascii_lowercase())
}

/// Builds a package from a zip asset and its checksum sidecar, fetching the
/// sidecar through the queue.
pub async fn form_package(
    queue: &DownloadQueue,
    format: &NameFormat,
    zip_asset: &ReleaseAsset,
    md5_asset: &ReleaseAsset,
) -> Result<Package> {
    let md5_sum = fetch_md5(queue, &md5_asset.browser_download_url)
        .await
        .map_err(|e| e.wrap("unable to download md5"))?;

    let pkg = parse_asset(zip_asset, &md5_sum, format)
        .map_err(|e| Error::with_source(ErrorKind::Parse, "unable to create package", e))?;
    debug!(name = %pkg.name, md5 = %pkg.md5, size = pkg.size, "package formed");
    Ok(pkg)
}

async fn fetch_md5(queue: &DownloadQueue, url: &str) -> Result<String> {
    let path = queue.add_single(url).await.map_err(|e| e.wrap("unable to download MD5 file"))?;
    let sidecar = ScratchFile::new(path);

    let contents = tokio::fs::read_to_string(sidecar.path())
        .await
        .context_kind(ErrorKind::Transfer, "unable to read MD5 file")?;

    Ok(parse_checksum_sidecar(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str) -> ReleaseAsset {
        ReleaseAsset::new(name, format!("https://github.com/opengapps/arm64/releases/download/x/{name}"), 1024)
    }

    #[test]
    fn recovers_every_token_combination() {
        let format = NameFormat::default();
        for platform in Platform::ALL {
            for android in Android::ALL {
                for variant in [Variant::Pico, Variant::Stock, Variant::TvMini] {
                    let name = format!("open_gapps-{platform}-{android}-{variant}-20230101.zip");
                    let pkg = parse_asset(&asset(&name), "abc", &format).unwrap();
                    assert_eq!(pkg.platform(), platform);
                    assert_eq!(pkg.android(), android);
                    assert_eq!(pkg.variant(), variant);
                    assert_eq!(pkg.date(), "20230101");
                    assert_eq!(pkg.name(), name);
                }
            }
        }
    }

    #[test]
    fn carries_asset_metadata() {
        let a = asset("open_gapps-arm64-11.0-pico-20230101.zip");
        let pkg = parse_asset(&a, "d41d8cd98f00b204e9800998ecf8427e", &NameFormat::default()).unwrap();
        assert_eq!(pkg.origin_url(), a.browser_download_url);
        assert_eq!(pkg.size(), 1024);
        assert_eq!(pkg.md5(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(pkg.local_url(), None);
        assert_eq!(pkg.remote_url(), None);
    }

    #[test]
    fn honours_custom_date_format() {
        let format = NameFormat { date_format: "%d%m%Y".into(), ..NameFormat::default() };
        let pkg = parse_asset(&asset("open_gapps-x86-9.0-nano-31122020.zip"), "", &format).unwrap();
        assert_eq!(pkg.date(), "31122020");

        let err = parse_asset(&asset("open_gapps-x86-9.0-nano-20231231.zip"), "", &format).unwrap_err();
        assert!(matches!(err, ParseError::Date { .. }));
    }

    #[test]
    fn rejects_malformed_names() {
        let format = NameFormat::default();
        let cases = [
            "open_gapps-arm64-11.0-pico-20230101.tar",
            "open_gapps-arm64-11-pico-20230101.zip",
            "open_gapps-arm64-11.0.1-pico-20230101.zip",
            "open_gapps-arm64-11.0-pico.zip",
            "open_gapps-arm64-11.0-pico-extra-20230101.zip",
            "open_gapps-mips-11.0-pico-20230101.zip",
            "open_gapps-arm64-12.0-pico-20230101.zip",
            "open_gapps-arm64-11.0-giant-20230101.zip",
            "open_gapps-arm64-11.0-pico-20230231.zip",
            "open_gapps-arm64-11.0-pico-2023-01-01.zip",
        ];
        for name in cases {
            assert!(parse_asset(&asset(name), "", &format).is_err(), "{name} should not parse");
        }
    }

    #[test]
    fn errors_name_the_offending_part() {
        let format = NameFormat::default();
        let err = |name: &str| parse_asset(&asset(name), "", &format).unwrap_err();

        assert!(matches!(err("open_gapps-arm64-11.0-pico-20230101.tar"), ParseError::Extension(e) if e == "tar"));
        assert!(matches!(err("open_gapps-arm64-11-pico-20230101.zip"), ParseError::Name(_)));
        assert!(matches!(err("open_gapps-arm64-11.0-pico.zip"), ParseError::Segments { count: 3, .. }));
        assert!(matches!(err("open_gapps-mips-11.0-pico-20230101.zip"), ParseError::Platform(p) if p == "mips"));
        assert!(matches!(err("open_gapps-arm-12.0-pico-20230101.zip"), ParseError::Android(a) if a == "12.0"));
        assert!(matches!(err("open_gapps-arm-11.0-giant-20230101.zip"), ParseError::Variant(v) if v == "giant"));
        assert!(matches!(err("open_gapps-arm-11.0-pico-20231301.zip"), ParseError::Date { value, .. } if value == "20231301"));
    }

    #[test]
    fn empty_name_or_url_never_builds_a_package() {
        let format = NameFormat::default();
        assert!(matches!(
            parse_asset(&ReleaseAsset::new("", "https://x", 1), "", &format),
            Err(ParseError::MissingName)
        ));
        assert!(matches!(
            parse_asset(&ReleaseAsset::new("open_gapps-arm-11.0-pico-20230101.zip", "", 1), "", &format),
            Err(ParseError::MissingUrl(_))
        ));
    }

    #[test]
    fn package_parts_need_three_tokens() {
        assert!(matches!(parse_package_parts(&["arm", "11.0"]), Err(ParseError::Arguments(2))));
        assert_eq!(
            parse_package_parts(&["x86_64", "7.1", "aroma"]).unwrap(),
            (Platform::X86_64, Android::V7_1, Variant::Aroma)
        );
    }

    #[test]
    fn sidecar_checksum_is_first_token() {
        let sum = parse_checksum_sidecar("D41D8CD98F00B204E9800998ECF8427E  open_gapps-arm-11.0-pico-20230101.zip\n").unwrap();
        assert_eq!(sum, "d41d8cd98f00b204e9800998ecf8427e");

        assert!(matches!(parse_checksum_sidecar("   \n"), Err(ParseError::Checksum(_))));
        assert!(matches!(parse_checksum_sidecar("<html>not found</html>"), Err(ParseError::Checksum(_))));
    }
}
