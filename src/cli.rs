use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};

use crate::config::IndexScope;

#[derive(Parser, Debug)]
#[command(version, about = "Rank resumes against a job description", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct JobArgs {
    /// Job description text
    #[clap(short, long)]
    pub job: Option<String>,

    /// Read the job description from a file
    #[clap(long)]
    pub job_file: Option<PathBuf>,
}

impl JobArgs {
    pub fn read(&self) -> anyhow::Result<String> {
        match (&self.job, &self.job_file) {
            (Some(job), _) => Ok(job.clone()),
            (None, Some(path)) => std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e)),
            (None, None) => anyhow::bail!("either --job or --job-file is required"),
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
}

#[derive(Subcommand, Debug, Clone)]
pub enum IndexArgs {
    /// Show what the persistent index holds.
    Stats {},
    /// Print indexed resume ids in insertion order.
    List {},
    /// Forget one indexed resume.
    Remove {
        /// Resume id (the uploaded filename)
        id: String,
    },
    /// Delete every entry of the persistent index.
    Clear {
        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Rank resumes against a job description
    Rank {
        #[clap(flatten)]
        job: JobArgs,

        /// Resume files (pdf, docx, txt, md)
        #[clap(required = true)]
        files: Vec<PathBuf>,

        /// Number of results (defaults to ranking.top_k from config)
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Ask the language model to explain every returned match
        #[clap(short, long, default_value = "false")]
        explain: bool,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,

        /// Override ranking.index_scope from config
        #[clap(long, value_enum)]
        scope: Option<IndexScope>,
    },
    /// Explain how well a single resume fits a job description
    Explain {
        #[clap(flatten)]
        job: JobArgs,

        /// Resume file
        file: PathBuf,
    },
    /// Manage the persistent index
    Index {
        #[clap(subcommand)]
        action: IndexArgs,
    },
    /// Start the HTTP daemon.
    Daemon {
        /// Listen address (defaults to daemon.listen_addr from config)
        #[clap(long)]
        addr: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rank() {
        let args = Args::try_parse_from([
            "rrank", "rank", "--job", "Python ML engineer", "a.txt", "b.pdf", "-k", "5", "--format",
            "json",
        ])
        .unwrap();

        match args.command {
            Command::Rank {
                job,
                files,
                top_k,
                format,
                explain,
                scope,
            } => {
                assert_eq!(job.job.as_deref(), Some("Python ML engineer"));
                assert_eq!(files.len(), 2);
                assert_eq!(top_k, Some(5));
                assert_eq!(format, OutputFormat::Json);
                assert!(!explain);
                assert_eq!(scope, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_rank_requires_job() {
        let result = Args::try_parse_from(["rrank", "rank", "a.txt"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_job_and_job_file_conflict() {
        let result =
            Args::try_parse_from(["rrank", "rank", "--job", "x", "--job-file", "jd.txt", "a.txt"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_index_remove() {
        let args = Args::try_parse_from(["rrank", "index", "remove", "cv.pdf"]).unwrap();
        match args.command {
            Command::Index {
                action: IndexArgs::Remove { id },
            } => assert_eq!(id, "cv.pdf"),
            other => panic!("unexpected command {other:?}"),
        }

        assert!(Args::try_parse_from(["rrank", "index", "remove"]).is_err());
    }

    #[test]
    fn test_parse_scope() {
        let args =
            Args::try_parse_from(["rrank", "rank", "-j", "x", "--scope", "persistent", "a.txt"])
                .unwrap();
        assert!(matches!(
            args.command,
            Command::Rank { scope: Some(IndexScope::Persistent), .. }
        ));
    }
}
