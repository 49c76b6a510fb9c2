// Per-provider payload overrides from `Request::provider_options`.

use llm_conduit_types::Request;
use serde_json::{Map, Value};

/// The options entry for `provider`, if the request carries one.
pub fn provider_options<'a>(request: &'a Request, provider: &str) -> Option<&'a Map<String, Value>> {
    request
        .provider_options
        .as_ref()
        .and_then(|opts| opts.get(provider))
        .and_then(Value::as_object)
}

/// Merge the request's options for `provider` into `body`.
///
/// Keys overwrite what the payload builder produced, except `tools`, which
/// is appended so vendor built-in tools can sit next to function tools.
pub fn merge_provider_options(body: &mut Map<String, Value>, request: &Request, provider: &str) {
    let Some(opts) = provider_options(request, provider) else {
        return;
    };
    for (key, value) in opts {
        if key == "tools" {
            if let (Some(Value::Array(existing)), Value::Array(extra)) = (body.get_mut(key), value) {
                existing.extend(extra.iter().cloned());
                continue;
            }
        }
        body.insert(key.clone(), value.clone());
    }
}
