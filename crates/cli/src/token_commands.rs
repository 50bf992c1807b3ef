use {
    anyhow::{Context, Result},
    clap::{Args, ValueEnum},
    hostdeck_config::{HostdeckConfig, SECRET_ENV},
    hostdeck_gateway::{Identity, Role, sign_token},
};

#[derive(Clone, Copy, ValueEnum)]
pub enum RoleArg {
    Admin,
    User,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Admin => Role::Admin,
            RoleArg::User => Role::User,
        }
    }
}

#[derive(Args)]
pub struct TokenArgs {
    /// Numeric user id carried as the token issuer.
    #[arg(long)]
    pub user_id: i64,
    #[arg(long, value_enum, default_value = "user")]
    pub role: RoleArg,
    /// Lifetime of the token.
    #[arg(long, default_value_t = 24)]
    pub ttl_hours: u32,
}

/// Mint an identity token with the configured secret and print it.
pub fn handle_token(args: TokenArgs, config: &HostdeckConfig) -> Result<()> {
    let secret = config
        .auth
        .secret
        .as_ref()
        .with_context(|| format!("no identity secret configured: set {SECRET_ENV}"))?;
    let identity = Identity {
        id: args.user_id,
        role: args.role.into(),
    };
    let token = sign_token(identity, secret, i64::from(args.ttl_hours) * 3600);
    println!("{token}");
    Ok(())
}
