use std::str::FromStr;

use assert_matches::assert_matches;
use krait_conda_types::{MatchSpec, PackageName, PackageRecord, RepoDataRecord, Version};
use krait_solve::{Pool, ProblemsGraph, RepoId, SolveError, SolveJobs, Solver, SolverFlags};

fn record(name: &str, version: &str, depends: &[&str]) -> RepoDataRecord {
    let mut package_record = PackageRecord::new(
        PackageName::new_unchecked(name),
        Version::from_str(version).unwrap(),
        "0".to_owned(),
    );
    package_record.depends = depends.iter().map(|d| (*d).to_owned()).collect();
    package_record.subdir = "linux-64".to_owned();
    RepoDataRecord {
        file_name: format!("{name}-{version}-0.tar.bz2"),
        url: format!("https://example.com/linux-64/{name}-{version}-0.tar.bz2")
            .parse()
            .unwrap(),
        channel: "https://example.com".to_owned(),
        package_record,
    }
}

fn add_all(pool: &mut Pool, repo: RepoId, records: &[RepoDataRecord]) {
    for record in records {
        pool.add_solvable(repo, record.clone());
    }
}

fn spec(s: &str) -> MatchSpec {
    MatchSpec::from_str(s).unwrap()
}

fn solved_names(result: &krait_solve::SolverResult) -> Vec<String> {
    result
        .records
        .iter()
        .map(|r| {
            format!(
                "{}={}",
                r.package_record.name.as_normalized(),
                r.package_record.version
            )
        })
        .collect()
}

#[test]
fn test_simple_install() {
    let mut pool = Pool::new();
    let repo = pool.add_repo("channel", None, 0, 0);
    add_all(&mut pool, repo, &[record("foo", "1.0", &[])]);

    let mut jobs = SolveJobs::default();
    jobs.install(spec("foo=1.0"));

    let result = Solver::new(SolverFlags::default())
        .solve(&mut pool, &jobs)
        .unwrap();

    assert_eq!(solved_names(&result), vec!["foo=1.0"]);
    assert_eq!(result.decisions.len(), 1);
    assert!(result.decisions[0].install);
}

#[test]
fn test_transitive_dependencies() {
    let mut pool = Pool::new();
    let repo = pool.add_repo("channel", None, 0, 0);
    add_all(
        &mut pool,
        repo,
        &[
            record("app", "1.0", &["lib >=2", "python 3.11.*"]),
            record("lib", "2.4", &["python 3.11.*"]),
            record("lib", "1.0", &[]),
            record("python", "3.11.4", &[]),
            record("python", "3.10.2", &[]),
        ],
    );

    let mut jobs = SolveJobs::default();
    jobs.install(spec("app"));

    let result = Solver::new(SolverFlags::default())
        .solve(&mut pool, &jobs)
        .unwrap();

    let mut names = solved_names(&result);
    names.sort();
    assert_eq!(names, vec!["app=1.0", "lib=2.4", "python=3.11.4"]);

    // Every dependency of the solution is satisfied within the solution.
    assert!(krait_conda_types::validate_dependencies(&result.records).is_ok());
}

#[test]
fn test_highest_version_is_preferred() {
    let mut pool = Pool::new();
    let repo = pool.add_repo("channel", None, 0, 0);
    add_all(
        &mut pool,
        repo,
        &[
            record("foo", "1.0", &[]),
            record("foo", "3.0", &[]),
            record("foo", "2.0", &[]),
        ],
    );

    let mut jobs = SolveJobs::default();
    jobs.install(spec("foo"));

    let result = Solver::new(SolverFlags::default())
        .solve(&mut pool, &jobs)
        .unwrap();
    assert_eq!(solved_names(&result), vec!["foo=3.0"]);
}

#[test]
fn test_backtracking_picks_older_version() {
    // The newest lib requires a python that conflicts with the requested
    // one, so the solver must fall back to an older lib.
    let mut pool = Pool::new();
    let repo = pool.add_repo("channel", None, 0, 0);
    add_all(
        &mut pool,
        repo,
        &[
            record("lib", "2.0", &["python 3.12.*"]),
            record("lib", "1.0", &["python 3.11.*"]),
            record("python", "3.12.1", &[]),
            record("python", "3.11.4", &[]),
        ],
    );

    let mut jobs = SolveJobs::default();
    jobs.install(spec("python 3.11.*"));
    jobs.install(spec("lib"));

    let result = Solver::new(SolverFlags::default())
        .solve(&mut pool, &jobs)
        .unwrap();
    let mut names = solved_names(&result);
    names.sort();
    assert_eq!(names, vec!["lib=1.0", "python=3.11.4"]);
}

/// Seed scenario: a job requesting a version that does not exist reports
/// the unmet spec and the versions that do exist.
#[test]
fn test_unsolvable_missing_version() {
    let mut pool = Pool::new();
    let repo = pool.add_repo("channel", None, 0, 0);
    add_all(
        &mut pool,
        repo,
        &[
            record("a", "0.1", &[]),
            record("a", "0.2", &[]),
            record("a", "0.3", &[]),
        ],
    );

    let mut jobs = SolveJobs::default();
    jobs.install(spec("a==0.4"));

    let err = Solver::new(SolverFlags::default())
        .solve(&mut pool, &jobs)
        .unwrap_err();
    let SolveError::Unsolvable(problem) = err else {
        panic!("expected an unsolvable error");
    };

    let graph = ProblemsGraph::from_problem(&pool, &problem);
    let message = graph.display_user_friendly(&pool).to_string();
    assert!(message.contains("a ==0.4"), "message was: {message}");
    assert!(
        message.contains("0.1") && message.contains("0.2") && message.contains("0.3"),
        "message was: {message}"
    );
}

/// Seed scenario: conflicting transitive requirements produce a problem
/// graph rooted at the requested package, with merged version ranges and a
/// populated conflict map.
#[test]
fn test_unsolvable_conflict_graph() {
    let mut pool = Pool::new();
    let repo = pool.add_repo("channel", None, 0, 0);
    add_all(
        &mut pool,
        repo,
        &[
            record("menu", "1.5", &["dropdown 2.*"]),
            record("menu", "1.0", &["dropdown 1.*"]),
            record("dropdown", "2.3", &["icons 2.*"]),
            record("dropdown", "2.2", &["icons 2.*"]),
            record("dropdown", "2.1", &["icons 2.*"]),
            record("dropdown", "2.0", &["icons 2.*"]),
            record("dropdown", "1.8", &["icons 1.*", "intl 3.*"]),
            record("icons", "2.0", &[]),
            record("icons", "1.0", &[]),
            record("intl", "5.0", &[]),
            record("intl", "3.0", &[]),
        ],
    );

    let mut jobs = SolveJobs::default();
    jobs.install(spec("menu"));
    jobs.install(spec("icons 1.*"));
    jobs.install(spec("intl 5.*"));

    let err = Solver::new(SolverFlags::default())
        .solve(&mut pool, &jobs)
        .unwrap_err();
    let SolveError::Unsolvable(problem) = err else {
        panic!("expected an unsolvable error");
    };

    let graph = ProblemsGraph::from_problem(&pool, &problem);

    // The conflict map is populated and symmetric.
    let conflict_map = graph.conflict_map();
    assert!(!conflict_map.is_empty());
    for (a, b) in conflict_map.iter_pairs() {
        assert!(conflict_map.in_conflict(b, a));
    }

    // The dropdown 2.x candidates collapse into a single merged node.
    let merged = graph.simplify(&pool);
    let merged_dropdowns: std::collections::HashSet<_> = merged
        .values()
        .filter(|m| {
            m.ids.iter().any(|&id| {
                pool_name(&pool, id) == "dropdown"
            })
        })
        .map(|m| m.ids.len())
        .collect();
    assert!(
        merged_dropdowns.contains(&4),
        "expected the four dropdown 2.x candidates to merge"
    );

    let message = graph.display_user_friendly(&pool).to_string();
    assert!(message.contains("menu"), "message was: {message}");
    assert!(message.contains("dropdown"), "message was: {message}");
    assert!(message.contains("icons"), "message was: {message}");
}

fn pool_name(pool: &Pool, id: krait_solve::SolvableId) -> String {
    pool.resolve_solvable(id)
        .record
        .package_record
        .name
        .as_normalized()
        .to_owned()
}

#[test]
fn test_remove_missing_package_is_an_error() {
    let mut pool = Pool::new();
    pool.add_repo("channel", None, 0, 0);

    let mut jobs = SolveJobs::default();
    jobs.remove(spec("does-not-exist"));

    let err = Solver::new(SolverFlags::default())
        .solve(&mut pool, &jobs)
        .unwrap_err();
    assert_matches!(err, SolveError::NotInstalled(specs) if specs == vec!["does-not-exist".to_owned()]);
}

#[test]
fn test_remove_cascades_to_dependents() {
    let mut pool = Pool::new();
    let installed = pool.add_repo("installed", None, 0, 0);
    add_all(
        &mut pool,
        installed,
        &[
            record("python", "3.11.4", &[]),
            record("requests", "2.28.2", &["python"]),
        ],
    );
    pool.set_installed_repo(installed);

    let mut jobs = SolveJobs::default();
    jobs.remove(spec("python"));

    let result = Solver::new(SolverFlags::default())
        .solve(&mut pool, &jobs)
        .unwrap();

    // Both python and its dependent are removed; nothing remains.
    assert!(result.records.is_empty());
    assert_eq!(result.decisions.len(), 2);
    assert!(result.decisions.iter().all(|d| !d.install));
}

#[test]
fn test_update_prefers_newer_version() {
    let mut pool = Pool::new();
    let installed = pool.add_repo("installed", None, 0, 0);
    add_all(&mut pool, installed, &[record("foo", "1.0", &[])]);
    pool.set_installed_repo(installed);

    let remote = pool.add_repo("channel", None, 0, 0);
    add_all(
        &mut pool,
        remote,
        &[record("foo", "1.0", &[]), record("foo", "2.0", &[])],
    );

    // A plain install keeps the installed version.
    let mut jobs = SolveJobs::default();
    jobs.install(spec("foo"));
    let result = Solver::new(SolverFlags::default())
        .solve(&mut pool, &jobs)
        .unwrap();
    assert_eq!(solved_names(&result), vec!["foo=1.0"]);
    assert!(result.decisions.is_empty());

    // An update moves to the best candidate.
    let mut jobs = SolveJobs::default();
    jobs.update(spec("foo"));
    let result = Solver::new(SolverFlags::default())
        .solve(&mut pool, &jobs)
        .unwrap();
    assert_eq!(solved_names(&result), vec!["foo=2.0"]);
}

#[test]
fn test_python_is_pinned_to_installed_minor() {
    let mut pool = Pool::new();
    let installed = pool.add_repo("installed", None, 0, 0);
    add_all(&mut pool, installed, &[record("python", "3.10.2", &[])]);
    pool.set_installed_repo(installed);

    let remote = pool.add_repo("channel", None, 0, 0);
    add_all(
        &mut pool,
        remote,
        &[
            record("python", "3.12.1", &[]),
            record("python", "3.10.9", &[]),
            // The newest lib needs a newer python minor; the pin forbids it.
            record("lib", "2.0", &["python 3.12.*"]),
            record("lib", "1.0", &["python 3.10.*"]),
        ],
    );

    let mut jobs = SolveJobs::default();
    jobs.install(spec("lib"));

    let result = Solver::new(SolverFlags::default())
        .solve(&mut pool, &jobs)
        .unwrap();
    let mut names = solved_names(&result);
    names.sort();
    assert_eq!(names, vec!["lib=1.0", "python=3.10.2"]);

    // When the user explicitly asks for a newer python the pin is not
    // applied.
    let mut jobs = SolveJobs::default();
    jobs.install(spec("python 3.12.*"));
    jobs.install(spec("lib"));
    let result = Solver::new(SolverFlags::default())
        .solve(&mut pool, &jobs)
        .unwrap();
    let mut names = solved_names(&result);
    names.sort();
    assert_eq!(names, vec!["lib=2.0", "python=3.12.1"]);
}

#[test]
fn test_constrains_are_honored() {
    let mut pool = Pool::new();
    let repo = pool.add_repo("channel", None, 0, 0);

    let mut constrained = record("server", "1.0", &[]);
    constrained.package_record.constrains = vec!["client <2".to_owned()];
    add_all(
        &mut pool,
        repo,
        &[
            constrained,
            record("client", "2.5", &[]),
            record("client", "1.5", &[]),
        ],
    );

    let mut jobs = SolveJobs::default();
    jobs.install(spec("server"));
    jobs.install(spec("client"));

    let result = Solver::new(SolverFlags::default())
        .solve(&mut pool, &jobs)
        .unwrap();
    let mut names = solved_names(&result);
    names.sort();
    // client 2.5 would violate server's constraint.
    assert_eq!(names, vec!["client=1.5", "server=1.0"]);
}

#[test]
fn test_lock_keeps_installed_version() {
    let mut pool = Pool::new();
    let installed = pool.add_repo("installed", None, 0, 0);
    add_all(&mut pool, installed, &[record("foo", "1.0", &[])]);
    pool.set_installed_repo(installed);

    let remote = pool.add_repo("channel", None, 0, 0);
    add_all(&mut pool, remote, &[record("foo", "2.0", &[])]);

    let mut jobs = SolveJobs::default();
    jobs.lock(spec("foo"));
    jobs.update(spec("foo"));

    let result = Solver::new(SolverFlags::default())
        .solve(&mut pool, &jobs)
        .unwrap();
    assert_eq!(solved_names(&result), vec!["foo=1.0"]);
}

#[test]
fn test_solver_is_deterministic() {
    let build_pool = || {
        let mut pool = Pool::new();
        let repo = pool.add_repo("channel", None, 0, 0);
        add_all(
            &mut pool,
            repo,
            &[
                record("a", "1.0", &["b", "c"]),
                record("b", "1.0", &["d >=1"]),
                record("b", "2.0", &["d >=2"]),
                record("c", "1.0", &["d <2"]),
                record("d", "1.0", &[]),
                record("d", "2.0", &[]),
            ],
        );
        pool
    };

    let mut jobs = SolveJobs::default();
    jobs.install(spec("a"));

    let mut previous: Option<Vec<String>> = None;
    for _ in 0..3 {
        let mut pool = build_pool();
        let result = Solver::new(SolverFlags::default())
            .solve(&mut pool, &jobs)
            .unwrap();
        let names = solved_names(&result);
        if let Some(previous) = &previous {
            assert_eq!(previous, &names);
        }
        previous = Some(names);
    }
}
