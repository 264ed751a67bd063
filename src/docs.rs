use utoipa::openapi::security::HttpAuthScheme;
use utoipa::OpenApi;

use crate::tier::Tier;
use crate::trending::Period;
use crate::types::{KeywordFrequency, LimitCheck, Usage, UsageRecord};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::server::usage_handler,
        crate::server::check_handler,
        crate::server::record_handler,
        crate::server::trending_handler,
    ),
    components(
        schemas(
            Usage,
            LimitCheck,
            UsageRecord,
            KeywordFrequency,
            Tier,
            Period
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "tally", description = "Search quota and trending keywords")
    ),
    info(
        title = "Tally API",
        version = "1.0",
        description = "Per-user search quotas and trending keywords",
        license(
            name = "BSD-3-Clause"
        )
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "jwt",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
