use std::{env, sync::Arc};

use anyhow::bail;
use app::App;
use config::Config;
use service::GoogleAi;

mod actions;
mod app;
mod board;
mod canvas;
mod cmd;
mod config;
mod datauri;
mod input;
mod math;
mod pointer;
mod service;
mod toast;

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_module(env!("CARGO_CRATE_NAME"), log::LevelFilter::Debug)
        .parse_default_env()
        .init();

    let config = match &*env::args_os().skip(1).collect::<Vec<_>>() {
        [] => Config::default(),
        [path] => Config::load(path)?,
        _ => {
            bail!("usage: {} [config.toml]", env!("CARGO_PKG_NAME"));
        }
    };

    let service = Arc::new(GoogleAi::new(&config.service));
    if let Err(e) = service.check_api_key() {
        log::warn!("{e}; diagram requests will fail until one is set");
    }

    let event_loop = winit::event_loop::EventLoop::<cmd::Cmd>::with_user_event().build()?;
    let proxy = event_loop.create_proxy();

    let mut app = App::new(config, service, proxy)?;
    Ok(event_loop.run_app(&mut app)?)
}
