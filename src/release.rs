//! Batch finalization of release builds

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use log::{debug, warn};

use crate::config::Config;
use crate::image::{IdentityPatch, LoadOptions};
use crate::legacy::LegacyMode;
use crate::pipeline::{Job, Params, Summary};
use crate::Error;

/// Suffix appended to the project name for finalized outputs
pub const RELEASE_SUFFIX: &str = "_crc";

/// Returns the jobs needed to release `input`: one without ids, then one per configured target
/// that is built from the same firmware project
pub fn jobs_for(input: &Path, config: &Config, load: LoadOptions, legacy: LegacyMode) -> Vec<Job> {
    let firmware = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let output = input.with_file_name(format!("{}{}", firmware, RELEASE_SUFFIX));

    let job = |identity: IdentityPatch| Job {
        input: input.to_path_buf(),
        output: output.clone(),
        load,
        params: Params { identity, legacy },
    };

    let mut jobs = vec![job(IdentityPatch::default())];
    jobs.extend(config.targets_for(&firmware).map(|target| job(target.identity())));

    debug!("{} job(s) for firmware {}", jobs.len(), firmware);

    jobs
}

/// The outcome of one job in a batch
#[derive(Debug)]
pub struct JobResult {
    pub job: Job,
    pub result: Result<Summary, Error>,
}

/// Splits jobs into groups that share an output directory, keeping their order
///
/// Every job writes the generic C source into its output directory, so the jobs of one
/// directory have to run one after another for the last input to win reliably. Each job is
/// paired with its position in `jobs`.
fn group_by_directory(jobs: Vec<Job>) -> Vec<Vec<(usize, Job)>> {
    let mut groups: Vec<(PathBuf, Vec<(usize, Job)>)> = Vec::new();

    for (index, job) in jobs.into_iter().enumerate() {
        let dir = job
            .output
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        match groups.iter_mut().find(|(group_dir, _)| *group_dir == dir) {
            Some((_, group)) => group.push((index, job)),
            None => groups.push((dir, vec![(index, job)])),
        }
    }

    groups.into_iter().map(|(_, group)| group).collect()
}

/// Runs the jobs of every input on a pool of `workers` threads
///
/// Jobs writing into the same directory run on the same worker in input order, since they share
/// the generic C output there. Results are returned in input order.
pub fn run_batch(
    inputs: &[PathBuf],
    config: &Config,
    load: LoadOptions,
    legacy: LegacyMode,
    workers: usize,
) -> Vec<JobResult> {
    let jobs: Vec<Job> = inputs
        .iter()
        .flat_map(|input| jobs_for(input, config, load, legacy))
        .collect();
    let groups = group_by_directory(jobs);
    let next = AtomicUsize::new(0);
    let workers = workers.max(1).min(groups.len().max(1));

    debug!(
        "Running {} group(s) of jobs on {} worker(s)",
        groups.len(),
        workers
    );

    let mut finished: Vec<(usize, JobResult)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut done = Vec::new();

                    while let Some(group) = groups.get(next.fetch_add(1, Ordering::Relaxed)) {
                        for (index, job) in group {
                            let result = job.run(config);

                            if let Err(err) = &result {
                                warn!("Finalizing {} failed: {}", job.input.display(), err);
                            }

                            done.push((
                                *index,
                                JobResult {
                                    job: job.clone(),
                                    result,
                                },
                            ));
                        }
                    }

                    done
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|handle| match handle.join() {
                Ok(done) => done,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });

    finished.sort_by_key(|(index, _)| *index);
    finished.into_iter().map(|(_, result)| result).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_should_create_a_job_per_target() {
        let config = Config::from_toml(
            r#"
            [[target]]
            firmware = "k20dx_frdmk22f_if"
            board-id = 0x0231
            family-id = 0x0001

            [[target]]
            firmware = "lpc11u35_archble_if"
            board-id = 0x9009
            "#,
        )
        .unwrap();

        let jobs = jobs_for(
            Path::new("build/k20dx_frdmk22f_if.hex"),
            &config,
            LoadOptions::default(),
            LegacyMode::Auto,
        );

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].output, Path::new("build/k20dx_frdmk22f_if_crc"));
        assert!(jobs[0].params.identity.is_empty());
        assert_eq!(jobs[1].params.identity.board_id, Some(0x0231));
        assert_eq!(jobs[1].params.identity.family_id, Some(0x0001));
    }

    #[test]
    fn it_should_report_failures_per_job() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = vec![dir.path().join("missing_a.hex"), dir.path().join("missing_b.hex")];

        let results = run_batch(
            &inputs,
            &Config::default(),
            LoadOptions::default(),
            LegacyMode::Auto,
            4,
        );

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].job.input, inputs[0]);
        assert_eq!(results[1].job.input, inputs[1]);
        assert!(results
            .iter()
            .all(|r| matches!(r.result, Err(Error::InputError(_, _)))));
    }

    fn write_firmware(path: &Path, len: usize) {
        let mut bytes = vec![0u8; len];
        bytes[..4].copy_from_slice(&0x2000_0000u32.to_le_bytes());

        let mut records: Vec<ihex::Record> = bytes
            .chunks(16)
            .enumerate()
            .map(|(i, chunk)| ihex::Record::Data {
                offset: (i * 16) as u16,
                value: chunk.to_vec(),
            })
            .collect();
        records.push(ihex::Record::EndOfFile);

        std::fs::write(path, ihex::create_object_file_representation(&records).unwrap()).unwrap();
    }

    #[test]
    fn it_should_group_jobs_by_output_directory() {
        let job = |output: &str| Job {
            input: PathBuf::from("in.hex"),
            output: PathBuf::from(output),
            load: LoadOptions::default(),
            params: Params::default(),
        };

        let groups = group_by_directory(vec![
            job("a/one_crc"),
            job("b/two_crc"),
            job("a/three_crc"),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(
            groups[0].iter().map(|(index, _)| *index).collect::<Vec<_>>(),
            vec![0, 2]
        );
        assert_eq!(groups[1][0].1.output, Path::new("b/two_crc"));
    }

    #[test]
    fn it_should_write_the_generic_source_of_the_last_input() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = vec![dir.path().join("a_if.hex"), dir.path().join("b_if.hex")];
        write_firmware(&inputs[0], 0x100);
        write_firmware(&inputs[1], 0x110);

        for _ in 0..20 {
            let results = run_batch(
                &inputs,
                &Config::default(),
                LoadOptions::default(),
                LegacyMode::Auto,
                2,
            );

            assert!(results.iter().all(|r| r.result.is_ok()));
            assert_eq!(results[0].job.input, inputs[0]);
            assert_eq!(results[1].job.input, inputs[1]);

            assert_eq!(
                std::fs::read(dir.path().join("bootloader_image.c")).unwrap(),
                std::fs::read(dir.path().join("b_if_crc.c")).unwrap()
            );
        }
    }
}
