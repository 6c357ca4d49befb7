use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::error::{Error, Result};
use crate::newick;
use crate::nj::DistanceMatrix;
use crate::topology::Topology;

fn is_gz(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".gz")
}

/// Opens `path` for reading; `-` is stdin and a `.gz` suffix is decompressed.
fn open_input(path: &Path) -> io::Result<Box<dyn BufRead>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path)?;
    if is_gz(path) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Read every Newick tree statement in a file (plain or gzip-compressed).
pub fn read_newick_trees<P: AsRef<Path>>(path: P) -> Result<Vec<Topology>> {
    let p = path.as_ref();
    let mut content = String::new();
    open_input(p)?.read_to_string(&mut content)?;
    let trees = newick::parse_all(&content)?;
    debug!(path = %p.display(), trees = trees.len(), "read newick trees");
    Ok(trees)
}

/// Read a labeled square matrix as written by [`write_matrix_tsv`].
///
/// The header row holds an empty corner cell followed by the column names;
/// every following row starts with its name. Blank lines are skipped.
pub fn read_matrix_tsv<P: AsRef<Path>>(path: P) -> Result<DistanceMatrix> {
    let p = path.as_ref();
    let format_error = |message: String| Error::Format {
        path: p.display().to_string(),
        message,
    };

    let mut lines = open_input(p)?.lines();
    let header = loop {
        match lines.next() {
            Some(line) => {
                let line = line?;
                if !line.trim().is_empty() {
                    break line;
                }
            }
            None => return Err(format_error("no header row".into())),
        }
    };
    let names: Vec<String> = header.split('\t').skip(1).map(|s| s.trim().to_string()).collect();

    let mut labels = Vec::with_capacity(names.len());
    let mut values = Vec::with_capacity(names.len());
    for (row, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut cells = line.split('\t');
        let label = cells.next().unwrap_or_default().trim().to_string();
        let parsed = cells
            .map(|cell| {
                cell.trim()
                    .parse::<f64>()
                    .map_err(|_| format_error(format!("row {}: cannot parse {cell:?} as a number", row + 1)))
            })
            .collect::<Result<Vec<f64>>>()?;
        labels.push(label);
        values.push(parsed);
    }

    if labels != names {
        return Err(format_error("row names do not match the header".into()));
    }
    Ok(DistanceMatrix::new(labels, values)?)
}

/// Write a labeled square matrix as TSV to a file.
/// If `path` ends with `.gz`, the output is gzip-compressed.
/// `-` (stdout) is rejected.
pub fn write_matrix_tsv<P: AsRef<Path>, T: std::fmt::Display>(
    path: P,
    names: &[String],
    mat: &[Vec<T>],
) -> io::Result<()> {
    let p = path.as_ref();
    if p.as_os_str() == "-" {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "writing to stdout is not supported by write_matrix_tsv",
        ));
    }
    if names.len() != mat.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} names for a matrix of {} rows", names.len(), mat.len()),
        ));
    }

    let mut out: Box<dyn Write> = if is_gz(p) {
        let f = File::create(p)?;
        let enc = GzEncoder::new(f, Compression::default());
        Box::new(BufWriter::new(enc))
    } else {
        Box::new(BufWriter::new(File::create(p)?))
    };

    // Header row
    write!(&mut out, "\t")?;
    for (k, name) in names.iter().enumerate() {
        if k > 0 {
            write!(&mut out, "\t")?;
        }
        write!(&mut out, "{}", name)?;
    }
    writeln!(&mut out)?;

    // Rows
    for (name, row) in names.iter().zip(mat) {
        write!(&mut out, "{}", name)?;
        for val in row {
            write!(&mut out, "\t{}", val)?;
        }
        writeln!(&mut out)?;
    }

    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tree-topology-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_matrix_tsv_roundtrip_plain_and_gz() {
        let names: Vec<String> = vec!["A".into(), "B".into(), "C".into()];
        let mat = vec![vec![0.0, 2.0, 4.0], vec![2.0, 0.0, 4.5], vec![4.0, 4.5, 0.0]];
        for file in ["m.tsv", "m.tsv.gz"] {
            let path = temp_path(file);
            write_matrix_tsv(&path, &names, &mat).unwrap();
            let read = read_matrix_tsv(&path).unwrap();
            assert_eq!(read.labels(), names.as_slice());
            assert_eq!(read.values(), mat.as_slice());
            std::fs::remove_file(&path).unwrap();
        }
    }

    #[test]
    fn test_read_newick_trees() {
        let path = temp_path("trees.nwk");
        std::fs::write(&path, "((A,B),C);\n((A,C),B);\n").unwrap();
        let trees = read_newick_trees(&path).unwrap();
        assert_eq!(trees.len(), 2);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_bad_matrix_cell() {
        let path = temp_path("bad.tsv");
        std::fs::write(&path, "\tA\tB\nA\t0\tx\nB\t1\t0\n").unwrap();
        assert!(matches!(read_matrix_tsv(&path), Err(Error::Format { .. })));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_stdout_is_rejected() {
        let err = write_matrix_tsv("-", &["A".to_string()], &[vec![0.0]]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
