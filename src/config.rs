//! Optional TOML config file. File values fill in for anything the user did
//! not set on the command line; explicit CLI flags always win.
use std::path::Path;

use clap::ArgMatches;
use clap::parser::ValueSource;
use serde::Deserialize;
use tracing::debug;

use crate::args::{FlutArgs, parse_duration_arg};
use crate::error::{AppError, AppResult, ValidationError};
use crate::flut::RenderOrder;

const DEFAULT_CONFIG_PATH: &str = "pxflood.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub connections: Option<usize>,
    pub image: Option<String>,
    pub stripes: Option<String>,
    pub xoffset: Option<i32>,
    pub yoffset: Option<i32>,
    pub order: Option<String>,
    pub rgbsplit: Option<bool>,
    pub offset_rand: Option<bool>,
    pub metrics: Option<bool>,
    pub runtime: Option<String>,
}

/// Loads the config file. An explicitly given path must exist; the implicit
/// default path is skipped silently when absent.
///
/// # Errors
///
/// Fails when the file is missing (explicit path only), unreadable, or not
/// valid TOML.
pub fn load_config(path: Option<&str>) -> AppResult<Option<FileConfig>> {
    match path {
        Some(path) => read_config(path, true),
        None => read_config(DEFAULT_CONFIG_PATH, false),
    }
}

fn read_config(path: &str, required: bool) -> AppResult<Option<FileConfig>> {
    if !Path::new(path).exists() {
        if required {
            return Err(AppError::validation(ValidationError::ConfigNotFound {
                path: path.to_owned(),
            }));
        }
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let config = toml::from_str::<FileConfig>(&raw)?;
    debug!("Loaded config from {}", path);
    Ok(Some(config))
}

/// Overlays `config` onto `args`, honoring only values the user did not set
/// on the command line (judged via the clap value source).
///
/// # Errors
///
/// Fails when the config runtime string does not parse.
pub fn apply_config(
    args: &mut FlutArgs,
    matches: &ArgMatches,
    config: &FileConfig,
) -> AppResult<()> {
    if let Some(host) = &config.host {
        if !is_cli(matches, "host") {
            args.host = host.clone();
        }
    }
    if let Some(connections) = config.connections {
        if !is_cli(matches, "connections") {
            args.connections = connections;
        }
    }
    if let Some(image) = &config.image {
        if !is_cli(matches, "image") && args.stripes.is_none() {
            args.image = Some(image.clone());
        }
    }
    if let Some(stripes) = &config.stripes {
        if !is_cli(matches, "stripes") && args.image.is_none() {
            args.stripes = Some(stripes.clone());
        }
    }
    if let Some(xoffset) = config.xoffset {
        if !is_cli(matches, "xoffset") {
            args.xoffset = xoffset;
        }
    }
    if let Some(yoffset) = config.yoffset {
        if !is_cli(matches, "yoffset") {
            args.yoffset = yoffset;
        }
    }
    if let Some(order) = &config.order {
        if !is_cli(matches, "order") {
            // Unknown names fall back to shuffle; the parse cannot fail.
            let Ok(order) = order.parse::<RenderOrder>();
            args.order = order;
        }
    }
    if let Some(rgbsplit) = config.rgbsplit {
        if !is_cli(matches, "rgbsplit") {
            args.rgbsplit = rgbsplit;
        }
    }
    if let Some(offset_rand) = config.offset_rand {
        if !is_cli(matches, "offset_rand") {
            args.offset_rand = offset_rand;
        }
    }
    if let Some(metrics) = config.metrics {
        if !is_cli(matches, "metrics") {
            args.metrics = metrics;
        }
    }
    if let Some(runtime) = &config.runtime {
        if !is_cli(matches, "runtime") {
            args.runtime = parse_duration_arg(runtime)?;
        }
    }
    Ok(())
}

fn is_cli(matches: &ArgMatches, id: &str) -> bool {
    matches
        .value_source(id)
        .is_some_and(|source| source != ValueSource::DefaultValue)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::time::Duration;

    use clap::{CommandFactory, FromArgMatches};

    use super::*;

    fn parse(argv: &[&str]) -> (FlutArgs, ArgMatches) {
        let matches = FlutArgs::command()
            .try_get_matches_from(argv)
            .expect("parse args");
        let args = FlutArgs::from_arg_matches(&matches).expect("build args");
        (args, matches)
    }

    #[test]
    fn missing_default_config_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(DEFAULT_CONFIG_PATH);
        let loaded = read_config(&path.to_string_lossy(), false);
        assert!(loaded.expect("load").is_none());
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        assert!(load_config(Some("/definitely/not/here.toml")).is_err());
    }

    #[test]
    fn config_fills_unset_values_only() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "host = \"config.example:1234\"\nconnections = 32\nruntime = \"10m\"\norder = \"btt\"\nmetrics = true"
        )
        .expect("write config");
        let path = file.path().to_string_lossy().into_owned();

        let (mut args, matches) = parse(&["pxflood", "--connections", "8"]);
        let config = load_config(Some(&path)).expect("load").expect("present");
        apply_config(&mut args, &matches, &config).expect("apply");

        // CLI flag survives, file values land everywhere else.
        assert_eq!(args.connections, 8);
        assert_eq!(args.host, "config.example:1234");
        assert_eq!(args.runtime, Duration::from_secs(600));
        assert_eq!(args.order, RenderOrder::BottomToTop);
        assert!(args.metrics);
    }

    #[test]
    fn rejects_unknown_keys() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "hosst = \"typo:1234\"").expect("write config");
        let path = file.path().to_string_lossy().into_owned();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn bad_runtime_in_config_fails() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "runtime = \"sideways\"").expect("write config");
        let path = file.path().to_string_lossy().into_owned();

        let (mut args, matches) = parse(&["pxflood"]);
        let config = load_config(Some(&path)).expect("load").expect("present");
        assert!(apply_config(&mut args, &matches, &config).is_err());
    }
}
