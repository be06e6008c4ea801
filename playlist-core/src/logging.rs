//! Tracing setup shared by every front end

use std::sync::Once;

use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: Once = Once::new();

const DIRECTIVES: &[&str] = &[
    "playlist_core=debug",
    "playlist_node=debug",
    "libp2p_mdns=info",
    "libp2p_swarm=info",
    "hyper_util=off",
    "reqwest=off",
    "hyper=off",
];

/// Install the stderr subscriber. Later calls are no-ops.
///
/// `RUST_LOG` is honoured; the crate directives are added on top of it.
pub fn init() {
    TRACING_INIT.call_once(|| {
        let filter = DIRECTIVES
            .iter()
            .filter_map(|d| d.parse::<Directive>().ok())
            .fold(EnvFilter::from_default_env(), |filter, d| filter.add_directive(d));

        let _ = tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
