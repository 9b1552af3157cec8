use iotid_identity::{AssertionDecoder, IdentityService};

pub struct AppState {
    pub service: IdentityService,
    pub decoder: AssertionDecoder,
}

impl AppState {
    pub fn new(service: IdentityService, decoder: AssertionDecoder) -> Self {
        AppState { service, decoder }
    }
}
