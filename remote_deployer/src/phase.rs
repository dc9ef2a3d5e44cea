use core::fmt;
use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// One named step of the deployment lifecycle
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Installs the container engine on the host ("config")
    PrepareHost,
    /// Ships the local working directory to the host ("initiate")
    UploadArtifacts,
    /// Builds one image per service ("build")
    BuildImages,
    /// (Re)starts one container per service ("deploy")
    RunContainers,
    /// Prints the health state of each service container ("healthcheck")
    HealthCheck,
    /// Restarts each service container
    Restart,
    /// Upload, build, run and health check in that order ("all")
    RunAll,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::PrepareHost,
        Phase::UploadArtifacts,
        Phase::BuildImages,
        Phase::RunContainers,
        Phase::HealthCheck,
        Phase::Restart,
        Phase::RunAll,
    ];

    /// The canonical kebab-case name
    pub fn name(self) -> &'static str {
        match self {
            Phase::PrepareHost => "prepare-host",
            Phase::UploadArtifacts => "upload-artifacts",
            Phase::BuildImages => "build-images",
            Phase::RunContainers => "run-containers",
            Phase::HealthCheck => "health-check",
            Phase::Restart => "restart",
            Phase::RunAll => "run-all",
        }
    }

    /// The short command name operators type
    pub fn command_name(self) -> &'static str {
        match self {
            Phase::PrepareHost => "config",
            Phase::UploadArtifacts => "initiate",
            Phase::BuildImages => "build",
            Phase::RunContainers => "deploy",
            Phase::HealthCheck => "healthcheck",
            Phase::Restart => "restart",
            Phase::RunAll => "all",
        }
    }

    /// If the rendered script depends on the service set at all
    pub fn uses_services(self) -> bool {
        !matches!(self, Phase::PrepareHost | Phase::UploadArtifacts)
    }

    /// Checks the service arguments given on the command line for this phase.
    /// `run-containers` needs at least one explicit service and
    /// `prepare-host` takes none.
    pub fn validate_services<S: AsRef<str>>(self, services: &[S]) -> Result<(), ServiceArgsError> {
        match self {
            Phase::RunContainers if services.is_empty() => {
                Err(ServiceArgsError::MissingService(self))
            }
            Phase::PrepareHost if !services.is_empty() => {
                Err(ServiceArgsError::UnexpectedService(self))
            }
            _ => Ok(()),
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Phase {
    type Err = ParsePhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|phase| (phase.name() == s) || (phase.command_name() == s))
            .ok_or_else(|| ParsePhaseError(s.to_owned()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "unknown command \"{0}\", expected one of config, initiate, build, deploy, healthcheck, all, \
     restart (or the phase names prepare-host, upload-artifacts, build-images, run-containers, \
     health-check, run-all)"
)]
pub struct ParsePhaseError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceArgsError {
    #[error("the '{}' command requires at least one service id", .0.command_name())]
    MissingService(Phase),
    #[error("the '{}' command does not take any service id as argument", .0.command_name())]
    UnexpectedService(Phase),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_naming_schemes() {
        for phase in Phase::ALL {
            assert_eq!(phase.name().parse::<Phase>().unwrap(), phase);
            assert_eq!(phase.command_name().parse::<Phase>().unwrap(), phase);
        }
        assert_eq!("healthcheck".parse::<Phase>().unwrap(), Phase::HealthCheck);
        assert!("deploy-all".parse::<Phase>().is_err());
        assert!("".parse::<Phase>().is_err());
    }

    #[test]
    fn service_argument_rules() {
        let none: [&str; 0] = [];
        assert_eq!(
            Phase::RunContainers.validate_services(&none),
            Err(ServiceArgsError::MissingService(Phase::RunContainers))
        );
        assert!(Phase::RunContainers.validate_services(&["api"]).is_ok());
        assert_eq!(
            Phase::PrepareHost.validate_services(&["api"]),
            Err(ServiceArgsError::UnexpectedService(Phase::PrepareHost))
        );
        assert!(Phase::PrepareHost.validate_services(&none).is_ok());
        assert!(Phase::BuildImages.validate_services(&none).is_ok());
        assert!(Phase::RunAll.validate_services(&["api", "worker"]).is_ok());
        assert_eq!(
            ServiceArgsError::MissingService(Phase::RunContainers).to_string(),
            "the 'deploy' command requires at least one service id"
        );
    }
}
