//! Node actions on the local machine.
//!
//! Tools are started through the platform shell with `%1` replaced by the node's input
//! files and `%2` by its output. When the session carries an environment block the child
//! environment is cleared and replaced by it. Processes are awaited on the runtime;
//! directory walks run on the blocking pool.

use std::fs;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::consts::{ARG_INPUTS, ARG_OUTPUT};
use crate::node::{CopyFileNode, DirectoryListNode, ExecNode, NodeKind, ObjectNode, ToolNode};
use crate::util::hash::{Stamp, file_stamp, hash_bytes};
use crate::util::path::clean_path;

use super::executor::{ActionOutput, Job, JobContext, NodeExecutor};
use super::types::ActionError;

/// Runs node actions as local processes and file operations.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
  pub fn new() -> Self {
    Self
  }
}

#[async_trait]
impl NodeExecutor for LocalExecutor {
  async fn execute(&self, job: &Job, ctx: &JobContext) -> Result<ActionOutput, ActionError> {
    match &job.kind {
      NodeKind::File | NodeKind::Compiler => Ok(ActionOutput::stamped(file_stamp(Path::new(&job.name)))),
      NodeKind::DirectoryList(list) => {
        let list = list.clone();
        let working_dir = ctx.working_dir.clone();
        tokio::task::spawn_blocking(move || list_directory(&list, &working_dir))
          .await
          .map_err(|e| ActionError::Walk(e.to_string()))?
      }
      NodeKind::CopyFile(copy) => copy_file(job, copy),
      NodeKind::Exec(exec) => run_exec(job, exec, ctx).await,
      NodeKind::Object(object) => compile_object(job, object, ctx).await,
      NodeKind::Library(tool) | NodeKind::Dll(tool) | NodeKind::Exe(tool) | NodeKind::Cs(tool) => {
        run_tool(job, tool, ctx).await
      }
      NodeKind::Unity => write_unity(job),
      NodeKind::Alias => Ok(ActionOutput::stamped(Stamp::combine(job.inputs.iter().map(|i| i.stamp)))),
    }
  }

  fn output_current(&self, job: &Job, _ctx: &JobContext) -> bool {
    match job.kind {
      NodeKind::Alias | NodeKind::File | NodeKind::Compiler | NodeKind::DirectoryList(_) => true,
      _ => file_stamp(Path::new(&job.name)) == job.stamp,
    }
  }
}

fn list_directory(list: &DirectoryListNode, working_dir: &str) -> Result<ActionOutput, ActionError> {
  let patterns = list
    .patterns
    .iter()
    .map(|p| {
      glob::Pattern::new(p).map_err(|e| ActionError::Pattern {
        pattern: p.clone(),
        message: e.to_string(),
      })
    })
    .collect::<Result<Vec<_>, _>>()?;

  let root = Path::new(&list.path);
  let mut files = Vec::new();
  if root.is_dir() {
    let mut walker = WalkDir::new(root).follow_links(true);
    if !list.recursive {
      walker = walker.max_depth(1);
    }
    let excluded = |path: &Path| list.exclude_paths.iter().any(|ex| path.starts_with(ex));

    for entry in walker.into_iter().filter_entry(|e| !excluded(e.path())) {
      let entry = entry.map_err(|e| ActionError::Walk(e.to_string()))?;
      if !entry.file_type().is_file() {
        continue;
      }
      let name = entry.file_name().to_string_lossy();
      if !patterns.is_empty() && !patterns.iter().any(|p| p.matches(&name)) {
        continue;
      }
      files.push(clean_path(&entry.path().to_string_lossy(), working_dir));
    }
  } else {
    debug!(path = %list.path, "directory does not exist, listing is empty");
  }
  files.sort();

  let stamp = Stamp::of_bytes(files.join("\n").as_bytes());
  debug!(path = %list.path, files = files.len(), "listed directory");
  Ok(ActionOutput {
    stamp,
    files: Some(files),
    cache_hit: false,
  })
}

fn copy_file(job: &Job, copy: &CopyFileNode) -> Result<ActionOutput, ActionError> {
  let source = job.input_name(copy.source);
  ensure_parent(&job.name)?;
  fs::copy(source, &job.name).map_err(|e| match e.kind() {
    io::ErrorKind::NotFound => ActionError::MissingInput(source.to_string()),
    _ => ActionError::io(&job.name, e),
  })?;
  output_stamp(&job.name)
}

async fn run_exec(job: &Job, exec: &ExecNode, ctx: &JobContext) -> Result<ActionOutput, ActionError> {
  let inputs = job.input_files(&[exec.executable]);
  let line = command_line(job.input_name(exec.executable), &exec.args, &inputs, &job.name);
  ensure_parent(&job.name)?;
  run(&line, &exec.working_dir, exec.expected_return_code, ctx).await?;
  output_stamp(&job.name)
}

async fn run_tool(job: &Job, tool: &ToolNode, ctx: &JobContext) -> Result<ActionOutput, ActionError> {
  let inputs = job.input_files(&[]);
  let line = command_line(&tool.tool, &tool.args, &inputs, &job.name);
  ensure_parent(&job.name)?;
  run(&line, &ctx.working_dir, 0, ctx).await?;
  output_stamp(&job.name)
}

async fn compile_object(job: &Job, object: &ObjectNode, ctx: &JobContext) -> Result<ActionOutput, ActionError> {
  let compiler = job.input_name(object.compiler);
  let source = job.input_name(object.source);
  ensure_parent(&job.name)?;

  // Key on everything that determines the object: command and source content.
  let cache_file = if ctx.cache_enabled() {
    fs::read(source).ok().map(|content| {
      let mut key = format!("{compiler}\n{}\n", object.args).into_bytes();
      key.extend_from_slice(&content);
      Path::new(&ctx.cache_path).join(hash_bytes(&key).0)
    })
  } else {
    None
  };

  if ctx.cache_read
    && let Some(cached) = cache_file.as_ref().filter(|p| p.is_file())
  {
    fs::copy(cached, &job.name).map_err(|e| ActionError::io(&job.name, e))?;
    debug!(node = %job.name, cache = %cached.display(), "cache hit");
    let mut output = output_stamp(&job.name)?;
    output.cache_hit = true;
    return Ok(output);
  }

  let line = command_line(compiler, &object.args, &[source.to_string()], &job.name);
  run(&line, &ctx.working_dir, 0, ctx).await?;
  let output = output_stamp(&job.name)?;

  if ctx.cache_write
    && let Some(cached) = cache_file
  {
    let stored = fs::create_dir_all(&ctx.cache_path).and_then(|_| fs::copy(&job.name, &cached));
    if let Err(e) = stored {
      warn!(node = %job.name, cache = %cached.display(), error = %e, "failed to store object in cache");
    }
  }
  Ok(output)
}

fn write_unity(job: &Job) -> Result<ActionOutput, ActionError> {
  let mut files = job.input_files(&[]);
  files.sort();
  let content: String = files.iter().map(|f| format!("#include \"{f}\"\n")).collect();

  // Rewriting identical content would bump the mtime and dirty every dependent.
  let unchanged = fs::read_to_string(&job.name).is_ok_and(|existing| existing == content);
  if !unchanged {
    ensure_parent(&job.name)?;
    fs::write(&job.name, content).map_err(|e| ActionError::io(&job.name, e))?;
  }
  output_stamp(&job.name)
}

fn ensure_parent(output: &str) -> Result<(), ActionError> {
  match Path::new(output).parent() {
    Some(parent) if !parent.as_os_str().is_empty() => {
      fs::create_dir_all(parent).map_err(|e| ActionError::io(parent.to_string_lossy(), e))
    }
    _ => Ok(()),
  }
}

fn output_stamp(output: &str) -> Result<ActionOutput, ActionError> {
  let stamp = file_stamp(Path::new(output));
  if stamp.is_none() {
    return Err(ActionError::MissingOutput(output.to_string()));
  }
  Ok(ActionOutput::stamped(stamp))
}

/// `executable args` with `%1` and `%2` expanded.
pub fn command_line(executable: &str, args: &str, inputs: &[String], output: &str) -> String {
  let inputs = inputs.iter().map(|i| quote(i)).collect::<Vec<_>>().join(" ");
  let args = args.replace(ARG_INPUTS, &inputs).replace(ARG_OUTPUT, &quote(output));
  if args.is_empty() {
    quote(executable)
  } else {
    format!("{} {}", quote(executable), args)
  }
}

fn quote(arg: &str) -> String {
  if arg.chars().any(char::is_whitespace) {
    format!("\"{arg}\"")
  } else {
    arg.to_string()
  }
}

async fn run(line: &str, working_dir: &str, expected: i32, ctx: &JobContext) -> Result<(), ActionError> {
  let (shell, shell_args) = shell();
  let mut command = Command::new(shell);
  command.args(shell_args).arg(line);
  if !working_dir.is_empty() {
    command.current_dir(working_dir);
  }
  if !ctx.environment.is_empty() {
    command.env_clear();
    command.envs(ctx.environment.iter().map(|(k, v)| (k.as_str(), v.as_str())));
  }

  debug!(command = %line, working_dir = %working_dir, "running tool");
  let output = command.output().await.map_err(|source| ActionError::Spawn {
    command: line.to_string(),
    source,
  })?;

  if output.status.code() != Some(expected) {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
      debug!(stderr = %stderr, "tool stderr");
    }
    return Err(ActionError::ExitCode {
      command: line.to_string(),
      code: output.status.code(),
      expected,
    });
  }
  Ok(())
}

/// The shell used to start tools.
fn shell() -> (&'static str, &'static [&'static str]) {
  #[cfg(unix)]
  {
    ("/bin/sh", &["-c"])
  }

  #[cfg(windows)]
  {
    ("cmd.exe", &["/C"])
  }
}
