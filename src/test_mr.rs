use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::mr::master::{clean_intermediate, JobStats, Master};
use crate::mr::worker::Worker;
use crate::mr::MRApp;
use crate::mrapps::get_app;
use crate::mrrt::sequential;

const N_REDUCE: usize = 5;
const WORDS: &[&str] = &[
    "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india", "juliett",
];

/// Writes `n_files` inputs into `dir` and returns their paths along with
/// the word counts a correct job must produce.
fn make_inputs(dir: &Path, n_files: usize) -> (Vec<String>, HashMap<String, usize>) {
    let mut expected = HashMap::new();
    let mut files = Vec::new();
    for i in 0..n_files {
        let mut text = String::new();
        for j in 0..(50 + i * 7) {
            let word = WORDS[(i * 31 + j * 17 + j / 3) % WORDS.len()];
            text.push_str(word);
            text.push_str(if j % 9 == 8 { ".\n" } else { " " });
            *expected.entry(word.to_string()).or_insert(0) += 1;
        }
        let path = dir.join(format!("input-{}.txt", i));
        std::fs::write(&path, text).unwrap();
        files.push(path.to_string_lossy().into_owned());
    }
    (files, expected)
}

fn read_counts(path: &Path) -> HashMap<String, usize> {
    std::fs::read_to_string(path).unwrap()
        .lines()
        .map(|line| {
            let (word, n) = line.split_once(": ").unwrap();
            (word.to_string(), n.parse().unwrap())
        })
        .collect()
}

fn app(name: &str) -> Arc<dyn MRApp> {
    Arc::from(get_app(name).unwrap())
}

async fn wait_for_socket(sock: &Path) {
    while !sock.exists() {
        sleep(Duration::from_millis(5)).await;
    }
}

fn start_master(dir: &Path, files: Vec<String>) -> (PathBuf, JoinHandle<Result<JobStats, anyhow::Error>>) {
    let sock = dir.join("master");
    let master = Master::new(dir, &sock);
    let handle = tokio::spawn(async move { master.run("test", &files, N_REDUCE).await });
    (sock, handle)
}

fn start_worker(dir: &Path, master: &Path, name: &str, max_tasks: Option<usize>) -> JoinHandle<Result<usize, anyhow::Error>> {
    let mut worker = Worker::new(dir, app("wc"));
    if let Some(n) = max_tasks {
        worker = worker.with_max_tasks(n);
    }
    let master = master.to_path_buf();
    let sock = dir.join(name);
    tokio::spawn(async move { worker.run(&master, &sock).await })
}

async fn finish(master: JoinHandle<Result<JobStats, anyhow::Error>>) -> JobStats {
    timeout(Duration::from_secs(60), master).await
        .expect("job did not finish")
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn sequential_word_count() {
    let dir = tempfile::tempdir().unwrap();
    let (files, expected) = make_inputs(dir.path(), 4);

    let result = sequential::run(dir.path(), "seq", &files, N_REDUCE, app("wc").as_ref()).await.unwrap();

    assert_eq!(read_counts(&result), expected);
}

#[tokio::test]
async fn sequential_inverted_index() {
    let dir = tempfile::tempdir().unwrap();
    let files: Vec<String> = [("a.txt", "x y"), ("b.txt", "y z y")].iter()
        .map(|(name, text)| {
            let path = dir.path().join(name);
            std::fs::write(&path, text).unwrap();
            path.to_string_lossy().into_owned()
        })
        .collect();

    let result = sequential::run(dir.path(), "ii", &files, 2, app("ii").as_ref()).await.unwrap();

    let contents = std::fs::read_to_string(result).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines, vec![
        format!("x: 1 {}", files[0]),
        format!("y: 2 {},{}", files[0], files[1]),
        format!("z: 1 {}", files[1]),
    ]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distributed_word_count() {
    let dir = tempfile::tempdir().unwrap();
    let (files, expected) = make_inputs(dir.path(), 6);
    let n_map = files.len();

    let (sock, master) = start_master(dir.path(), files);
    wait_for_socket(&sock).await;
    let workers: Vec<_> = (0..3)
        .map(|i| start_worker(dir.path(), &sock, &format!("worker-{}", i), None))
        .collect();

    let stats = finish(master).await;

    assert_eq!(stats.map.n_tasks, n_map);
    assert_eq!(stats.reduce.n_tasks, N_REDUCE);
    assert_eq!(stats.map.failures + stats.reduce.failures, 0);
    assert_eq!(read_counts(&stats.result), expected);
    let total: u64 = stats.worker_tasks.iter().map(|(_, n)| n).sum();
    assert_eq!(total as usize, n_map + N_REDUCE);
    for worker in workers {
        timeout(Duration::from_secs(10), worker).await.unwrap().unwrap().unwrap();
    }

    clean_intermediate(dir.path(), "test", n_map, N_REDUCE).await.unwrap();
    assert!(stats.result.exists());
    assert!(!crate::mr::common::reduce_name(dir.path(), "test", 0, 0).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_worker_dies() {
    let dir = tempfile::tempdir().unwrap();
    let (files, expected) = make_inputs(dir.path(), 8);

    let (sock, master) = start_master(dir.path(), files);
    wait_for_socket(&sock).await;
    let doomed = start_worker(dir.path(), &sock, "doomed", Some(3));
    let steady = start_worker(dir.path(), &sock, "steady", None);

    let stats = finish(master).await;

    assert_eq!(read_counts(&stats.result), expected);
    let ran = timeout(Duration::from_secs(10), doomed).await.unwrap().unwrap().unwrap();
    assert!(ran <= 3);
    timeout(Duration::from_secs(10), steady).await.unwrap().unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn workers_keep_dying() {
    let dir = tempfile::tempdir().unwrap();
    let (files, expected) = make_inputs(dir.path(), 10);

    let (sock, master) = start_master(dir.path(), files);
    wait_for_socket(&sock).await;

    // a stream of short-lived workers and nobody reliable
    let done = Arc::new(AtomicBool::new(false));
    let spawner = {
        let done = done.clone();
        let dir = dir.path().to_path_buf();
        let sock = sock.clone();
        tokio::spawn(async move {
            let mut i = 0;
            while !done.load(Ordering::SeqCst) {
                start_worker(&dir, &sock, &format!("w{}", i), Some(1 + i % 3));
                i += 1;
                sleep(Duration::from_millis(20)).await;
            }
        })
    };

    let stats = finish(master).await;
    done.store(true, Ordering::SeqCst);
    spawner.await.unwrap();

    assert_eq!(read_counts(&stats.result), expected);
    assert!(stats.map.attempts >= stats.map.n_tasks);
    assert!(stats.reduce.attempts >= stats.reduce.n_tasks);
}
