use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "capview")]
#[command(about = "Inspect FHIR CapabilityStatements and exercise FHIR REST endpoints")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// CapabilityStatement URL, e.g. https://server/fhir/metadata (overrides config and CAPVIEW_URL)
    #[arg(short, long, global = true, env = "CAPVIEW_URL")]
    pub server: Option<String>,

    /// Bearer token sent with REST test requests
    #[arg(short, long, global = true, env = "CAPVIEW_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Config profile name
    #[arg(short, long, global = true, env = "CAPVIEW_PROFILE", default_value = "default")]
    pub profile: String,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Per-request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum, Default, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch and display a CapabilityStatement
    Load(LoadArgs),
    /// List the resource types a server declares
    Resources(LoadArgs),
    /// Run tests against the server's REST API
    Test(TestArgs),
    /// Print a shareable viewer link for the current URL
    Permalink(PermalinkArgs),
    /// Manage CLI configuration
    Config(ConfigArgs),
}

#[derive(clap::Args)]
pub struct LoadArgs {
    /// CapabilityStatement URL (defaults to --server)
    pub url: Option<String>,
    /// Do not append _format=json to the request URL
    #[arg(long)]
    pub no_format_param: bool,
    /// Print the raw JSON document
    #[arg(long)]
    pub raw: bool,
    /// Send --token with the metadata request (relay fallback is then unavailable)
    #[arg(long)]
    pub authenticated: bool,
}

#[derive(clap::Args)]
pub struct TestArgs {
    #[command(subcommand)]
    pub command: TestCommands,
}

#[derive(Subcommand)]
pub enum TestCommands {
    /// Check reachability with GET {base}/Patient?_count=1
    Connection {
        /// When the authenticated request is blocked, retry without the token through the relay
        #[arg(long)]
        retry_without_token: bool,
    },
    /// Search, read, create, read, update and delete a test Patient
    Workflow,
    /// GET {base}/Patient with optional search parameters
    Search {
        /// Search parameters as key=value pairs (e.g. name=Smith birthdate=gt1990-01-01)
        params: Vec<String>,
    },
    /// GET {base}/Patient/{id}
    Read {
        id: String,
    },
    /// POST {base}/Patient
    Create {
        /// Path to a Patient JSON file (a default test Patient is used if omitted)
        #[arg(long)]
        file: Option<String>,
    },
    /// PUT {base}/Patient/{id}
    Update {
        id: String,
        /// Path to a Patient JSON file (reads from stdin if omitted)
        #[arg(long)]
        file: Option<String>,
    },
    /// DELETE {base}/Patient/{id}
    Delete {
        id: String,
        /// Confirm the deletion; it cannot be undone
        #[arg(long)]
        yes: bool,
    },
}

impl TestCommands {
    /// Commands that validate the server's CapabilityStatement and derive the
    /// REST base from it before sending any request.
    pub fn loads_capability(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Workflow)
    }
}

#[derive(clap::Args)]
pub struct PermalinkArgs {
    /// CapabilityStatement URL (defaults to --server)
    pub url: Option<String>,
    /// Viewer base URL (overrides the profile's `viewer` key)
    #[arg(long)]
    pub viewer: Option<String>,
}

#[derive(clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current config
    Show,
    /// Set config value
    Set(ConfigSetArgs),
}

#[derive(clap::Args)]
pub struct ConfigSetArgs {
    /// Key to set (server, format, relay_a, relay_b, viewer)
    pub key: String,
    /// Value; relays take an optional `envelope:`, `raw:` or `query:` prefix
    /// (`query:` for a self-hosted capview-relay), or "off" to disable
    pub value: String,
}
