use relay::RelayService;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) relay: RelayService,
    pub(crate) allowed_origins: Vec<String>,
}
