//! Command-line interface of the admin tool.

use clap::{Parser, Subcommand};
use waypoint_core::redirect::{MatchStrategy, NewRedirect, RedirectMethod};
use waypoint_core::sources::{find_source, Source, SOURCE_ALL};
use waypoint_core::types::DbId;

#[derive(Parser, Debug)]
#[command(name = "waypoint-admin")]
#[command(about = "Redirect rule maintenance", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List admin sources and the bulk actions each one offers
    Sources,

    /// List rules of the current site in precedence order
    List {
        /// Source key (`*`, `method:301`, `method:302`, `method:404`)
        #[arg(value_parser = parse_source, default_value = SOURCE_ALL)]
        source: Source,

        /// Case-insensitive text to search for
        search: Option<String>,
    },

    /// Rule count and remaining quota
    Stats,

    /// Create a rule on the current site
    Create {
        /// Old URL, or a pattern with --regex
        old: String,

        /// Target URL; `-` for the site root
        new: String,

        /// Method code (301, 302 or 404)
        #[arg(value_parser = parse_method)]
        code: RedirectMethod,

        /// Treat the old URL as a regular expression
        #[arg(long)]
        regex: bool,
    },

    /// Change the method of the given rules
    SetMethod {
        #[arg(value_parser = parse_method)]
        code: RedirectMethod,

        #[arg(required = true)]
        ids: Vec<DbId>,
    },

    /// Enable the given rules
    Enable {
        #[arg(required = true)]
        ids: Vec<DbId>,
    },

    /// Disable the given rules
    Disable {
        #[arg(required = true)]
        ids: Vec<DbId>,
    },

    /// Add the rules' old URLs to the excluded patterns and delete them
    Exclude {
        #[arg(required = true)]
        ids: Vec<DbId>,
    },

    /// Hard-delete the given rules
    Delete {
        #[arg(required = true)]
        ids: Vec<DbId>,
    },
}

impl Command {
    /// Draft for a `create` command.
    pub fn draft(old: &str, new: &str, code: RedirectMethod, regex: bool) -> NewRedirect {
        let new_url = (new != "-").then_some(new);
        let mut draft = NewRedirect::new(old, new_url, code);
        if regex {
            draft.match_strategy = MatchStrategy::RegexMatch;
        }
        draft
    }
}

fn parse_method(code: &str) -> Result<RedirectMethod, String> {
    code.parse::<i16>()
        .ok()
        .and_then(RedirectMethod::from_code)
        .ok_or_else(|| format!("'{code}' is not a redirect method (301, 302 or 404)"))
}

fn parse_source(key: &str) -> Result<Source, String> {
    find_source(key).ok_or_else(|| format!("unknown source '{key}'"))
}
