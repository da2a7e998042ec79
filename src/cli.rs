use clap::{ArgAction, Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::apply_curl::{default_output_path, ApplyCurlPaths};
use crate::config::AppConfig;
use crate::highperf::HighPerfPaths;
use crate::pipeline::{ClusterExport, OutputPaths, SourcePaths};
use crate::url_utils::normalize_prefix;

#[derive(Parser, Debug)]
#[command(name = "linkaudit")]
#[command(about = "Internal linking audit and recommendation engine for crawl exports")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose logging (-v for per-input detail, -vv for debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only print the final summary
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (defaults to ./config/linkaudit.toml, then built-in defaults)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Export execution logs to a file
    #[arg(long = "log_file", global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Baseline audit over per-cluster inlink and outlink exports
    Audit(AuditArgs),

    /// Dashboard workbook for a generic site
    Dashboard(DashboardArgs),

    /// Fold a curl map into a finished run
    ApplyCurlMap(ApplyCurlArgs),

    /// Restrict ADD rows to high-performing content and re-rotate anchors
    Highperf(HighPerfArgs),

    /// Assign URL buckets from custom rules and page metadata
    Classify(ClassifyArgs),

    /// Write the default configuration file
    Init(InitArgs),
}

/// Scope settings that override the `[site]` section
#[derive(Args, Debug, Clone, Default)]
pub struct SiteOverrides {
    /// In-scope path prefix, e.g. /wisconsin/
    #[arg(long = "scope_prefix", value_name = "PREFIX")]
    pub scope_prefix: Option<String>,

    /// Comma-separated out-of-scope prefixes
    #[arg(long = "cross_scope_prefixes", value_name = "PREFIXES", value_delimiter = ',')]
    pub cross_scope_prefixes: Option<Vec<String>>,

    /// Internal host; inferred from the core pages list when omitted
    #[arg(long = "internal_domain", value_name = "HOST")]
    pub internal_domain: Option<String>,
}

impl SiteOverrides {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(prefix) = &self.scope_prefix {
            config.site.scope_prefix = normalize_prefix(prefix);
        }
        if let Some(prefixes) = &self.cross_scope_prefixes {
            config.site.cross_scope_prefixes = prefixes
                .iter()
                .map(|p| p.trim())
                .filter(|p| !p.is_empty())
                .map(normalize_prefix)
                .collect();
        }
        if let Some(domain) = &self.internal_domain {
            config.site.internal_domain = domain.trim().to_string();
        }
    }
}

/// Optional inputs shared by `audit` and `dashboard`
#[derive(Args, Debug, Clone, Default)]
pub struct ExtraInputs {
    /// Redirect (3xx) export with a final-URL column
    #[arg(long = "redirect_3xx", value_name = "CSV")]
    pub redirect_3xx: Option<PathBuf>,

    /// Curl map TSV: URL, FINAL_STATUS, EFFECTIVE_URL (no header)
    #[arg(long = "curl_map", value_name = "TSV")]
    pub curl_map: Option<PathBuf>,

    /// Page metadata (URL, Title, Meta Description, H1, Type) for the classifier
    #[arg(long = "page_metadata", value_name = "CSV")]
    pub metadata: Option<PathBuf>,

    /// Custom bucket rules, one `Name: field=token|token; field=token` per line
    #[arg(long = "bucket_rules", value_name = "FILE")]
    pub bucket_rules: Option<PathBuf>,

    /// Curated anchor bank (Core Page Name, Anchor Category, Anchor Text, Anchor Rationale)
    #[arg(long = "anchor_bank", value_name = "CSV")]
    pub anchor_bank: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    #[arg(long = "out_xlsx", value_name = "PATH")]
    pub out_xlsx: PathBuf,

    #[arg(long = "out_csv", value_name = "PATH")]
    pub out_csv: PathBuf,

    /// Anchor rationale CSV
    #[arg(long = "out_anchor_rationale_csv", value_name = "PATH")]
    pub out_rationale_csv: Option<PathBuf>,

    /// Machine-readable action summary
    #[arg(long = "out_summary_json", value_name = "PATH")]
    pub out_summary_json: Option<PathBuf>,
}

impl OutputArgs {
    pub fn to_paths(&self) -> OutputPaths {
        OutputPaths {
            xlsx: self.out_xlsx.clone(),
            csv: self.out_csv.clone(),
            rationale_csv: self.out_rationale_csv.clone(),
            summary_json: self.out_summary_json.clone(),
        }
    }
}

/// `CLUSTER=PATH`
pub fn parse_cluster_export(raw: &str) -> Result<ClusterExport, String> {
    let (cluster, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected CLUSTER=PATH, got '{}'", raw))?;
    if cluster.trim().is_empty() || path.trim().is_empty() {
        return Err(format!("expected CLUSTER=PATH, got '{}'", raw));
    }
    Ok(ClusterExport {
        cluster: cluster.trim().to_string(),
        path: PathBuf::from(path.trim()),
    })
}

#[derive(Args, Debug, Clone)]
pub struct AuditArgs {
    /// Content (blog) page list
    #[arg(long = "wi_blogs", visible_alias = "content_pages", value_name = "CSV")]
    pub content_pages: PathBuf,

    /// Core pages and sub-services list
    #[arg(long = "core_subserv", visible_alias = "core_pages", value_name = "CSV")]
    pub core_pages: PathBuf,

    /// Sitewide outlinks export, filtered to content sources while streaming
    #[arg(long = "all_blog_outlinks", visible_alias = "content_outlinks", value_name = "CSV")]
    pub content_outlinks: PathBuf,

    /// Per-cluster inlinks export (`--inlinks_<cluster> PATH` is accepted too)
    #[arg(long = "inlinks", value_name = "CLUSTER=PATH", value_parser = parse_cluster_export)]
    pub inlinks: Vec<ClusterExport>,

    /// Per-cluster core page outlinks export (`--outlinks_<cluster> PATH` is accepted too)
    #[arg(long = "outlinks", value_name = "CLUSTER=PATH", value_parser = parse_cluster_export)]
    pub outlinks: Vec<ClusterExport>,

    #[command(flatten)]
    pub extra: ExtraInputs,

    #[command(flatten)]
    pub site: SiteOverrides,

    #[command(flatten)]
    pub output: OutputArgs,
}

impl AuditArgs {
    pub fn source_paths(&self) -> SourcePaths {
        SourcePaths {
            core_pages: self.core_pages.clone(),
            content_pages: self.content_pages.clone(),
            content_outlinks: self.content_outlinks.clone(),
            redirect_3xx: self.extra.redirect_3xx.clone(),
            inlinks: self.inlinks.clone(),
            outlinks: self.outlinks.clone(),
            curl_map: self.extra.curl_map.clone(),
            metadata: self.extra.metadata.clone(),
            bucket_rules: self.extra.bucket_rules.clone(),
            anchor_bank: self.extra.anchor_bank.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct DashboardArgs {
    #[arg(long = "core_pages", value_name = "CSV")]
    pub core_pages: PathBuf,

    #[arg(long = "content_pages", value_name = "CSV")]
    pub content_pages: PathBuf,

    #[arg(long = "content_outlinks", value_name = "CSV")]
    pub content_outlinks: PathBuf,

    /// Cluster ID -> inlinks_path, outlinks_path
    #[arg(long = "core_exports_map", value_name = "CSV")]
    pub core_exports_map: Option<PathBuf>,

    /// Keep only the Dashboard visible
    #[arg(long = "hide_appendices")]
    pub hide_appendices: bool,

    #[command(flatten)]
    pub extra: ExtraInputs,

    #[command(flatten)]
    pub site: SiteOverrides,

    #[command(flatten)]
    pub output: OutputArgs,
}

impl DashboardArgs {
    pub fn source_paths(&self, inlinks: Vec<ClusterExport>, outlinks: Vec<ClusterExport>) -> SourcePaths {
        SourcePaths {
            core_pages: self.core_pages.clone(),
            content_pages: self.content_pages.clone(),
            content_outlinks: self.content_outlinks.clone(),
            redirect_3xx: self.extra.redirect_3xx.clone(),
            inlinks,
            outlinks,
            curl_map: self.extra.curl_map.clone(),
            metadata: self.extra.metadata.clone(),
            bucket_rules: self.extra.bucket_rules.clone(),
            anchor_bank: self.extra.anchor_bank.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ApplyCurlArgs {
    #[arg(long = "xlsx_in", value_name = "PATH")]
    pub xlsx_in: PathBuf,

    #[arg(long = "csv_in", value_name = "PATH")]
    pub csv_in: PathBuf,

    #[arg(long = "curl_map_tsv", value_name = "TSV")]
    pub curl_map_tsv: PathBuf,

    /// Defaults to `<xlsx_in stem>_curl.xlsx`
    #[arg(long = "xlsx_out", value_name = "PATH")]
    pub xlsx_out: Option<PathBuf>,

    /// Defaults to `<csv_in stem>_curl.csv`
    #[arg(long = "csv_out", value_name = "PATH")]
    pub csv_out: Option<PathBuf>,

    #[arg(long = "internal_domain", value_name = "HOST")]
    pub internal_domain: Option<String>,
}

impl ApplyCurlArgs {
    pub fn paths(&self) -> ApplyCurlPaths {
        ApplyCurlPaths {
            xlsx_in: self.xlsx_in.clone(),
            csv_in: self.csv_in.clone(),
            curl_map: self.curl_map_tsv.clone(),
            xlsx_out: self.xlsx_out.clone().unwrap_or_else(|| default_output_path(&self.xlsx_in)),
            csv_out: self.csv_out.clone().unwrap_or_else(|| default_output_path(&self.csv_in)),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct HighPerfArgs {
    #[arg(long = "baseline_xlsx", value_name = "PATH")]
    pub baseline_xlsx: PathBuf,

    #[arg(long = "baseline_impl_csv", value_name = "PATH")]
    pub baseline_impl_csv: PathBuf,

    /// Core pages list used to name targets for the anchor bank
    #[arg(long = "core_pages", value_name = "CSV")]
    pub core_pages: PathBuf,

    #[arg(long = "ga4_csv", value_name = "CSV")]
    pub ga4_csv: PathBuf,

    #[arg(long = "gsc_csv", value_name = "CSV")]
    pub gsc_csv: PathBuf,

    /// Ahrefs backlinks export (UTF-16 or UTF-8 TSV)
    #[arg(long = "ahrefs_csv", value_name = "TSV")]
    pub ahrefs_csv: PathBuf,

    /// URLs forced into the high-performer set
    #[arg(long = "extra_hp_urls_csv", value_name = "CSV")]
    pub extra_hp_urls_csv: Option<PathBuf>,

    /// URLs removed from the high-performer set
    #[arg(long = "exclude_sources_csv", value_name = "CSV")]
    pub exclude_sources_csv: Option<PathBuf>,

    /// Anchor bank CSV; defaults to the baseline workbook's Anchor Bank sheet
    #[arg(long = "anchor_bank", value_name = "CSV")]
    pub anchor_bank: Option<PathBuf>,

    #[arg(long = "ga4_top_n", value_name = "N")]
    pub ga4_top_n: Option<usize>,

    #[arg(long = "gsc_top_n", value_name = "N")]
    pub gsc_top_n: Option<usize>,

    #[arg(long = "ahrefs_top_n", value_name = "N")]
    pub ahrefs_top_n: Option<usize>,

    #[arg(long = "internal_domain", value_name = "HOST")]
    pub internal_domain: Option<String>,

    #[arg(long = "out_xlsx", value_name = "PATH")]
    pub out_xlsx: PathBuf,

    #[arg(long = "out_impl_csv", value_name = "PATH")]
    pub out_impl_csv: PathBuf,

    #[arg(long = "out_anchor_rationale_csv", value_name = "PATH")]
    pub out_anchor_rationale_csv: PathBuf,
}

impl HighPerfArgs {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(n) = self.ga4_top_n {
            config.highperf.ga4_top_n = n;
        }
        if let Some(n) = self.gsc_top_n {
            config.highperf.gsc_top_n = n;
        }
        if let Some(n) = self.ahrefs_top_n {
            config.highperf.ahrefs_top_n = n;
        }
        if let Some(domain) = &self.internal_domain {
            config.site.internal_domain = domain.trim().to_string();
        }
    }

    pub fn paths(&self) -> HighPerfPaths {
        HighPerfPaths {
            baseline_xlsx: self.baseline_xlsx.clone(),
            baseline_csv: self.baseline_impl_csv.clone(),
            core_pages: self.core_pages.clone(),
            ga4: self.ga4_csv.clone(),
            gsc: self.gsc_csv.clone(),
            ahrefs: self.ahrefs_csv.clone(),
            extra_hp_urls: self.extra_hp_urls_csv.clone(),
            exclude_sources: self.exclude_sources_csv.clone(),
            anchor_bank: self.anchor_bank.clone(),
            out_xlsx: self.out_xlsx.clone(),
            out_csv: self.out_impl_csv.clone(),
            out_rationale_csv: self.out_anchor_rationale_csv.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClassifyArgs {
    /// URL list (URL, Address or Content URL column)
    #[arg(long = "urls", value_name = "CSV")]
    pub urls: PathBuf,

    #[arg(long = "page_metadata", value_name = "CSV")]
    pub metadata: Option<PathBuf>,

    #[arg(long = "bucket_rules", value_name = "FILE")]
    pub bucket_rules: Option<PathBuf>,

    #[arg(long = "internal_domain", value_name = "HOST")]
    pub internal_domain: Option<String>,

    #[arg(long = "out_csv", value_name = "PATH")]
    pub out_csv: PathBuf,

    #[arg(long = "out_warnings_csv", value_name = "PATH")]
    pub out_warnings_csv: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    /// Where to write the file
    #[arg(long, value_name = "FILE")]
    pub path: Option<PathBuf>,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

/// Value of `--config` in raw argv, if present
pub fn config_path_hint(args: &[String]) -> Option<PathBuf> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            return iter.next().map(PathBuf::from);
        }
        if let Some(value) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(value));
        }
    }
    None
}

/// Cluster id for a flag suffix: configured alias, else the suffix upper-cased with dashes
pub fn cluster_for_suffix(suffix: &str, aliases: &BTreeMap<String, String>) -> String {
    let key = suffix.to_lowercase();
    aliases
        .get(&key)
        .cloned()
        .unwrap_or_else(|| key.replace('_', "-").to_uppercase())
}

/// Rewrite `--inlinks_<suffix> PATH` and `--outlinks_<suffix>=PATH` into `--inlinks CLUSTER=PATH`
pub fn rewrite_cluster_flags(args: Vec<String>, aliases: &BTreeMap<String, String>) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        let rewritten = ["inlinks", "outlinks"].iter().find_map(|kind| {
            let rest = arg.strip_prefix(&format!("--{}_", kind))?;
            Some((*kind, rest.to_string()))
        });
        let Some((kind, rest)) = rewritten else {
            out.push(arg);
            continue;
        };
        let (suffix, value) = match rest.split_once('=') {
            Some((s, v)) => (s.to_string(), Some(v.to_string())),
            None => (rest, iter.next()),
        };
        out.push(format!("--{}", kind));
        // a missing value is left for clap to report
        if let Some(path) = value {
            out.push(format!("{}={}", cluster_for_suffix(&suffix, aliases), path));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    fn aliases() -> BTreeMap<String, String> {
        [("divorce", "DIV"), ("child_custody", "CH-CUS")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_cluster_flags_are_rewritten() {
        let out = rewrite_cluster_flags(
            argv("linkaudit audit --inlinks_divorce div.csv --outlinks_child_custody=cus.csv --outlinks_guardianship g.csv"),
            &aliases(),
        );
        assert_eq!(
            out,
            argv("linkaudit audit --inlinks DIV=div.csv --outlinks CH-CUS=cus.csv --outlinks GUARDIANSHIP=g.csv")
        );
    }

    #[test]
    fn test_audit_parses_documented_flags() {
        let args = rewrite_cluster_flags(
            argv(
                "linkaudit audit --wi_blogs b.csv --core_subserv c.csv --all_blog_outlinks o.csv \
                 --inlinks_divorce i.csv --outlinks_divorce x.csv --out_xlsx r.xlsx --out_csv r.csv \
                 --scope_prefix wisconsin --cross_scope_prefixes /illinois/,/iowa/ -vv",
            ),
            &aliases(),
        );
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Audit(audit) = cli.command else {
            panic!("expected audit");
        };
        assert_eq!(audit.inlinks[0].cluster, "DIV");
        assert_eq!(audit.outlinks[0].path, PathBuf::from("x.csv"));

        let mut config = AppConfig::embedded_default().unwrap();
        audit.site.apply(&mut config);
        assert_eq!(config.site.scope_prefix, "/wisconsin/");
        assert_eq!(config.site.cross_scope_prefixes, vec!["/illinois/", "/iowa/"]);
    }

    #[test]
    fn test_apply_curl_defaults_output_names() {
        let cli = Cli::try_parse_from(argv(
            "linkaudit apply-curl-map --xlsx_in out/run.xlsx --csv_in out/run.csv --curl_map_tsv curl.tsv",
        ))
        .unwrap();
        let Commands::ApplyCurlMap(args) = cli.command else {
            panic!("expected apply-curl-map");
        };
        let paths = args.paths();
        assert_eq!(paths.csv_out, PathBuf::from("out/run_curl.csv"));
    }

    #[test]
    fn test_config_hint() {
        assert_eq!(config_path_hint(&argv("x --config a.toml audit")), Some(PathBuf::from("a.toml")));
        assert_eq!(config_path_hint(&argv("x --config=b.toml")), Some(PathBuf::from("b.toml")));
        assert_eq!(config_path_hint(&argv("x audit")), None);
    }

    #[test]
    fn test_bad_cluster_export() {
        assert!(parse_cluster_export("DIV").is_err());
        assert!(parse_cluster_export("=x.csv").is_err());
    }
}
