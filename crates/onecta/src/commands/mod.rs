//! Command dispatch: bridges CLI args -> controller calls -> output formatting.

pub mod auth;
pub mod devices;
pub mod watch;

use onecta_core::Controller;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

pub async fn dispatch(
    cmd: Command,
    controller: &Controller,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::AuthUrl(args) => auth::auth_url(controller, &args, global),
        Command::Exchange(args) => auth::exchange(controller, &args, global).await,
        Command::Login(args) => auth::login(controller, args, global).await,
        Command::Logout => auth::logout(controller, global).await,
        Command::Status => auth::status(controller, global).await,
        Command::Devices => devices::list(controller, global).await,
        Command::Get(args) => devices::get(controller, &args, global).await,
        Command::Set(args) => devices::set(controller, &args, global).await,
        Command::Watch(args) => watch::handle(controller, &args, global).await,
    }
}
