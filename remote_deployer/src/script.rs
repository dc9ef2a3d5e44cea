use core::fmt;
use std::{fmt::Display, path::Path};

use serde::{Deserialize, Serialize};
use stacked_errors::{bail, Result, StackableErr};
use tokio::fs;

use crate::{acquire_dir_path, Phase};

/// Where artifacts live, both locally and on the remote host
pub const DEFAULT_WORKING_DIR: &str = "./export/";

/// The services used when none are given
pub const DEFAULT_SERVICES: [&str; 2] = ["api", "test"];

/// Forces non-interactive package manager defaults so that no prompt can block
/// the session. Always sent before anything else.
pub const PRIMING_COMMAND: &str =
    "echo 'debconf debconf/frontend select Noninteractive' | debconf-set-selections";

/// An ordered sequence of shell commands, insertion order is execution order
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandScript {
    commands: Vec<String>,
}

impl CommandScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command
    pub fn push(&mut self, command: impl Into<String>) {
        self.commands.push(command.into());
    }

    /// Appends all the commands of `other` after the commands of `self`
    pub fn append(mut self, other: CommandScript) -> Self {
        self.commands.extend(other.commands);
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.commands.iter()
    }

    pub fn into_inner(self) -> Vec<String> {
        self.commands
    }

    /// Trims every command and drops the ones left empty. Applying this twice
    /// is the same as applying it once.
    pub fn strip_blank_lines(self) -> Self {
        self.commands
            .iter()
            .map(|command| command.trim())
            .filter(|command| !command.is_empty())
            .collect()
    }

    /// Returns the script that actually goes over the wire: the priming command
    /// followed by the blank-stripped commands of `self`
    pub fn with_priming(self) -> Self {
        let mut primed = CommandScript::new();
        primed.push(PRIMING_COMMAND);
        primed.append(self.strip_blank_lines())
    }
}

impl Display for CommandScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for command in &self.commands {
            writeln!(f, "{command}")?;
        }
        Ok(())
    }
}

impl<S: Into<String>> FromIterator<S> for CommandScript {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            commands: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl IntoIterator for CommandScript {
    type IntoIter = std::vec::IntoIter<String>;
    type Item = String;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}

impl<'a> IntoIterator for &'a CommandScript {
    type IntoIter = std::slice::Iter<'a, String>;
    type Item = &'a String;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

/// Where the container engine packages come from during `prepare-host`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSetup {
    /// Distribution path segment of the package repository, e.g. "debian"
    pub distribution: String,
    /// Release codename, e.g. "stretch"
    pub release: String,
    pub arch: String,
}

impl Default for HostSetup {
    fn default() -> Self {
        Self {
            distribution: "debian".to_owned(),
            release: "stretch".to_owned(),
            arch: "amd64".to_owned(),
        }
    }
}

/// Escapes file contents for embedding inside the double quotes of an
/// `echo -e`. Newlines become a literal `\n` and double quotes are
/// backslashed, nothing else is touched.
pub fn escape_for_echo(contents: &str) -> String {
    contents.replace('\n', "\\n").replace('"', "\\\"")
}

/// Single quotes `path` for the shell unless it only has characters the shell
/// takes literally, in which case it is returned as is
pub fn quote_path(path: &str) -> String {
    let literal = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c);
    if !path.is_empty() && path.chars().all(literal) {
        path.to_owned()
    } else {
        format!("'{}'", path.replace('\'', r"'\''"))
    }
}

/// Renders lifecycle phases into shell scripts.
///
/// Everything except `upload-artifacts` is a pure function of the working
/// directory and the services. The upload reads every regular file in the
/// local working directory at render time and embeds its contents.
///
/// The working directory is used verbatim as a string prefix for remote paths,
/// so it always ends with a `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptBuilder {
    pub working_dir: String,
    pub services: Vec<String>,
    pub host_setup: HostSetup,
}

impl Default for ScriptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_WORKING_DIR, Vec::<String>::new())
    }
}

impl ScriptBuilder {
    /// An empty `services` means the default set of services
    pub fn new<I, S>(working_dir: impl AsRef<str>, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut working_dir = working_dir.as_ref().to_owned();
        if working_dir.is_empty() {
            working_dir.push_str("./");
        } else if !working_dir.ends_with('/') {
            working_dir.push('/');
        }
        Self {
            working_dir,
            services: services
                .into_iter()
                .map(|s| s.as_ref().to_owned())
                .collect(),
            host_setup: HostSetup::default(),
        }
    }

    /// Sets `host_setup`
    pub fn host_setup(mut self, host_setup: HostSetup) -> Self {
        self.host_setup = host_setup;
        self
    }

    /// The services that scripts are rendered for, in order
    pub fn effective_services(&self) -> Vec<&str> {
        if self.services.is_empty() {
            DEFAULT_SERVICES.to_vec()
        } else {
            self.services.iter().map(String::as_str).collect()
        }
    }

    /// Path of the recipe file of `service`
    fn recipe(&self, service: &str) -> String {
        format!("{}{service}", self.working_dir)
    }

    pub fn prepare_host(&self) -> CommandScript {
        let HostSetup {
            distribution,
            release,
            arch,
        } = &self.host_setup;
        [
            "apt-get update".to_owned(),
            "apt-get install -y apt-transport-https ca-certificates curl".to_owned(),
            format!(
                "curl -fsSL \"https://download.docker.com/linux/{distribution}/gpg\" | \
                 APT_KEY_DONT_WARN_ON_DANGEROUS_USAGE=true apt-key add -"
            ),
            format!(
                "echo \"deb [arch={arch}] https://download.docker.com/linux/{distribution} \
                 {release} stable\" > /etc/apt/sources.list.d/docker.list"
            ),
            "apt-get update".to_owned(),
            "apt-get install -y --no-install-recommends docker-ce".to_owned(),
            "docker version".to_owned(),
        ]
        .into_iter()
        .collect()
    }

    /// Recreates the remote working directory and writes every regular file of
    /// the local working directory into it, in directory listing order.
    pub async fn upload_artifacts(&self) -> Result<CommandScript> {
        let dir = &self.working_dir;
        if dir.trim_end_matches('/').is_empty() {
            bail!("ScriptBuilder::upload_artifacts -> refusing to recreate the filesystem root")
        }
        let mut script = CommandScript::new();
        script.push(format!("rm -rf {dir}"));
        script.push(format!("mkdir -p {dir}"));

        let local_dir = acquire_dir_path(Path::new(dir))
            .await
            .stack_err_with(|| format!("{self:?}.upload_artifacts()"))?;
        let mut entries = fs::read_dir(&local_dir)
            .await
            .stack_err_with(|| format!("upload_artifacts -> failed to read {local_dir:?}"))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .stack_err_with(|| format!("upload_artifacts -> failed to list {local_dir:?}"))?
        {
            let path = entry.path();
            // follows symlinks, a link to a regular file is shipped as that file
            let metadata = fs::metadata(&path).await.stack()?;
            if !metadata.is_file() {
                continue
            }
            let contents = fs::read_to_string(&path)
                .await
                .stack_err_with(|| format!("upload_artifacts -> failed to read {path:?}"))?;
            let target = format!("{dir}{}", entry.file_name().to_string_lossy());
            script.push(format!(
                "echo -e \"{}\" > {}",
                escape_for_echo(&contents),
                quote_path(&target)
            ));
        }
        script.push(format!("ls {dir}"));
        Ok(script)
    }

    pub fn build_images(&self) -> CommandScript {
        let dir = &self.working_dir;
        self.effective_services()
            .into_iter()
            .map(|service| {
                format!(
                    "docker build -t {service} -f {} {dir}",
                    self.recipe(service)
                )
            })
            .collect()
    }

    /// Stops and removes any existing container, then launches a fresh one.
    /// The launch prefix is the first line of the recipe file minus its first
    /// character (the recipe starts with a comment such as
    /// `#docker run -p 80:80`).
    pub fn run_containers(&self) -> CommandScript {
        let mut script = CommandScript::new();
        for service in self.effective_services() {
            script.push(format!(
                "[ \"$(docker ps -a | grep {service})\" ] && docker stop {service} && docker rm \
                 {service}"
            ));
            script.push(format!(
                "[ ! \"$(docker ps -a | grep {service})\" ] && $(head -n 1 {} | cut -c2-) -d \
                 --name {service} {service} && sleep 3 && docker logs {service} 2>&1",
                self.recipe(service)
            ));
        }
        script
    }

    pub fn health_check(&self) -> CommandScript {
        self.effective_services()
            .into_iter()
            .map(|service| {
                format!(
                    "[ \"$(docker ps -a | grep {service})\" ] && docker inspect {service} | jq \
                     '.[].State.Health'"
                )
            })
            .collect()
    }

    pub fn restart(&self) -> CommandScript {
        self.effective_services()
            .into_iter()
            .map(|service| {
                format!("[ \"$(docker ps -a | grep {service})\" ] && docker restart {service}")
            })
            .collect()
    }

    /// `upload-artifacts`, `build-images`, `run-containers`, then
    /// `health-check`. `prepare-host` is not part of it.
    pub async fn run_all(&self) -> Result<CommandScript> {
        Ok(self
            .upload_artifacts()
            .await?
            .append(self.build_images())
            .append(self.run_containers())
            .append(self.health_check()))
    }

    pub async fn render(&self, phase: Phase) -> Result<CommandScript> {
        let script = match phase {
            Phase::PrepareHost => self.prepare_host(),
            Phase::UploadArtifacts => self.upload_artifacts().await?,
            Phase::BuildImages => self.build_images(),
            Phase::RunContainers => self.run_containers(),
            Phase::HealthCheck => self.health_check(),
            Phase::Restart => self.restart(),
            Phase::RunAll => self.run_all().await?,
        };
        Ok(script)
    }
}

/// Shorthand for `ScriptBuilder::new(working_dir, services).render(phase)`
pub async fn render<I, S>(
    phase: Phase,
    working_dir: impl AsRef<str>,
    services: I,
) -> Result<CommandScript>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    ScriptBuilder::new(working_dir, services)
        .render(phase)
        .await
        .stack_err_with(|| format!("render(phase: {phase})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), "x\ny").unwrap();
        std::fs::write(dir.path().join("b"), "hello \"world\"").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        dir
    }

    fn dir_string(dir: &tempfile::TempDir) -> String {
        format!("{}/", dir.path().display())
    }

    #[test]
    fn escaping() {
        assert_eq!(escape_for_echo("x\ny"), r"x\ny");
        assert_eq!(escape_for_echo("hello \"world\""), r#"hello \"world\""#);
        assert_eq!(escape_for_echo("plain"), "plain");
    }

    #[test]
    fn working_dir_gets_trailing_slash() {
        assert_eq!(ScriptBuilder::new("/srv", ["api"]).working_dir, "/srv/");
        assert_eq!(ScriptBuilder::new("/srv/", ["api"]).working_dir, "/srv/");
        assert_eq!(ScriptBuilder::new("", ["api"]).working_dir, "./");
        assert_eq!(ScriptBuilder::default().working_dir, DEFAULT_WORKING_DIR);
    }

    #[test]
    fn build_single_service() {
        let script = ScriptBuilder::new("/srv/", ["api"]).build_images();
        assert_eq!(script.commands(), ["docker build -t api -f /srv/api /srv/"]);
    }

    #[test]
    fn empty_services_are_the_defaults() {
        let none = ScriptBuilder::new("/srv/", Vec::<String>::new());
        let defaults = ScriptBuilder::new("/srv/", DEFAULT_SERVICES);
        assert_eq!(none.build_images(), defaults.build_images());
        assert_eq!(none.run_containers(), defaults.run_containers());
        assert_eq!(none.health_check(), defaults.health_check());
        assert_eq!(none.restart(), defaults.restart());
        assert_eq!(none.prepare_host(), defaults.prepare_host());
        assert_eq!(none.build_images().len(), 2);
    }

    #[tokio::test]
    async fn empty_services_run_all_uses_the_defaults() {
        let dir = artifact_dir();
        let none = ScriptBuilder::new(dir_string(&dir), Vec::<String>::new());
        let defaults = ScriptBuilder::new(dir_string(&dir), DEFAULT_SERVICES);
        let all = none.run_all().await.unwrap();
        assert_eq!(all, defaults.run_all().await.unwrap());
        assert!(all.iter().any(|c| c.starts_with("docker build -t api ")));
        assert!(all.iter().any(|c| c.starts_with("docker build -t test ")));
    }

    #[test]
    fn quoting_paths() {
        assert_eq!(quote_path("./export/api"), "./export/api");
        assert_eq!(quote_path("./export/my file"), "'./export/my file'");
        assert_eq!(quote_path("./export/it's"), r"'./export/it'\''s'");
        assert_eq!(quote_path("./export/$HOME"), "'./export/$HOME'");
    }

    #[tokio::test]
    async fn upload_quotes_unusual_names() {
        let dir = artifact_dir();
        std::fs::write(dir.path().join("my file"), "spaced").unwrap();
        let dir_s = dir_string(&dir);
        let script = ScriptBuilder::new(&dir_s, ["api"]).upload_artifacts().await.unwrap();
        assert!(script
            .iter()
            .any(|c| *c == format!(r#"echo -e "spaced" > '{dir_s}my file'"#)));
        // plain names stay unquoted
        assert!(script.iter().any(|c| *c == format!(r#"echo -e "x\ny" > {dir_s}a"#)));
    }

    #[test]
    fn run_containers_guards_each_service() {
        let script = ScriptBuilder::new("./export/", ["web"]).run_containers();
        assert_eq!(script.commands(), [
            "[ \"$(docker ps -a | grep web)\" ] && docker stop web && docker rm web",
            "[ ! \"$(docker ps -a | grep web)\" ] && $(head -n 1 ./export/web | cut -c2-) -d \
             --name web web && sleep 3 && docker logs web 2>&1",
        ]);
    }

    #[test]
    fn health_check_and_restart() {
        let builder = ScriptBuilder::new("./export/", ["api", "db"]);
        assert_eq!(builder.health_check().commands(), [
            "[ \"$(docker ps -a | grep api)\" ] && docker inspect api | jq '.[].State.Health'",
            "[ \"$(docker ps -a | grep db)\" ] && docker inspect db | jq '.[].State.Health'",
        ]);
        assert_eq!(builder.restart().commands(), [
            "[ \"$(docker ps -a | grep api)\" ] && docker restart api",
            "[ \"$(docker ps -a | grep db)\" ] && docker restart db",
        ]);
    }

    #[test]
    fn prepare_host_sequence() {
        let script = ScriptBuilder::default().prepare_host();
        assert_eq!(script.len(), 7);
        assert_eq!(script.commands()[0], "apt-get update");
        assert!(script.commands()[3].contains("debian stretch stable"));
        assert!(script.commands()[3].contains("[arch=amd64]"));
        assert_eq!(script.commands()[6], "docker version");

        let script = ScriptBuilder::default()
            .host_setup(HostSetup {
                distribution: "ubuntu".to_owned(),
                release: "jammy".to_owned(),
                arch: "arm64".to_owned(),
            })
            .prepare_host();
        assert!(script.commands()[2].contains("linux/ubuntu/gpg"));
        assert!(script.commands()[3]
            .contains("[arch=arm64] https://download.docker.com/linux/ubuntu jammy stable"));
    }

    #[test]
    fn blank_stripping_is_idempotent() {
        let script: CommandScript = ["  ls  ", "", "   ", "\tdocker ps\n", "echo hi"]
            .into_iter()
            .collect();
        let once = script.strip_blank_lines();
        assert_eq!(once.commands(), ["ls", "docker ps", "echo hi"]);
        assert_eq!(once.clone().strip_blank_lines(), once);
    }

    #[test]
    fn priming_comes_first() {
        let script: CommandScript = ["", "ls"].into_iter().collect();
        let primed = script.with_priming();
        assert_eq!(primed.commands(), [PRIMING_COMMAND, "ls"]);
    }

    #[tokio::test]
    async fn upload_embeds_escaped_files() {
        let dir = artifact_dir();
        let dir_s = dir_string(&dir);
        let script = render(Phase::UploadArtifacts, &dir_s, Vec::<String>::new())
            .await
            .unwrap();
        let commands = script.commands();
        assert_eq!(commands[0], format!("rm -rf {dir_s}"));
        assert_eq!(commands[1], format!("mkdir -p {dir_s}"));
        assert_eq!(commands.last().unwrap(), &format!("ls {dir_s}"));
        // two files, the subdirectory is skipped
        assert_eq!(commands.len(), 5);
        assert!(commands.contains(&format!(r#"echo -e "x\ny" > {dir_s}a"#)));
        assert!(commands.contains(&format!(r#"echo -e "hello \"world\"" > {dir_s}b"#)));
        assert!(!commands.iter().any(|c| c.contains("nested")));
    }

    #[tokio::test]
    async fn upload_ignores_services() {
        let dir = artifact_dir();
        let dir_s = dir_string(&dir);
        let a = render(Phase::UploadArtifacts, &dir_s, ["x"]).await.unwrap();
        let b = render(Phase::UploadArtifacts, &dir_s, ["y", "z"]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn upload_needs_local_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = format!("{}/missing/", dir.path().display());
        assert!(render(Phase::UploadArtifacts, missing, ["api"]).await.is_err());
        assert!(ScriptBuilder::new("/", ["api"]).upload_artifacts().await.is_err());
    }

    #[tokio::test]
    async fn run_all_is_the_concatenation() {
        let dir = artifact_dir();
        let builder = ScriptBuilder::new(dir_string(&dir), ["api", "worker"]);
        let all = builder.render(Phase::RunAll).await.unwrap();
        let expected = builder
            .render(Phase::UploadArtifacts)
            .await
            .unwrap()
            .append(builder.render(Phase::BuildImages).await.unwrap())
            .append(builder.render(Phase::RunContainers).await.unwrap())
            .append(builder.render(Phase::HealthCheck).await.unwrap());
        assert_eq!(all, expected);
        let prepare = builder.prepare_host();
        assert!(!all.iter().any(|c| prepare.commands().contains(c)));
    }

    #[tokio::test]
    async fn every_phase_renders_something() {
        let dir = artifact_dir();
        let builder = ScriptBuilder::new(dir_string(&dir), Vec::<String>::new());
        for phase in Phase::ALL {
            assert!(!builder.render(phase).await.unwrap().is_empty(), "{phase}");
        }
    }
}
