// self
use crate::{
	_prelude::*,
	obs::{FlowKind, FlowOutcome},
};

/// Increments `oidc_login_flow_total{flow, outcome}` when the `metrics` feature is enabled.
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		let flow = kind.as_str();
		let outcome = outcome.as_str();

		metrics::counter!("oidc_login_flow_total", "flow" => flow, "outcome" => outcome)
			.increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	let _ = (kind, outcome);
}

/// Records the terminal outcome of `result`, keeping cancellations apart from failures.
pub fn record_flow_result<T>(kind: FlowKind, result: &Result<T>) {
	let outcome = match result {
		Ok(_) => FlowOutcome::Success,
		Err(Error::Cancelled) => FlowOutcome::Cancelled,
		Err(_) => FlowOutcome::Failure,
	};

	record_flow_outcome(kind, outcome);
}
