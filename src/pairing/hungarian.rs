//! Minimum-cost rectangular assignment (Hungarian method with potentials).

/// Assigns each row of `cost` to a distinct column minimizing total cost.
///
/// Works on any `rows x cols` shape: when there are more rows than columns the
/// problem is solved transposed and surplus rows stay unassigned. Returns, per
/// row, the assigned column index.
pub fn solve(cost: &[Vec<f64>]) -> Vec<Option<usize>> {
    let rows = cost.len();
    let cols = cost.first().map_or(0, Vec::len);
    if rows == 0 || cols == 0 {
        return vec![None; rows];
    }
    if rows <= cols {
        return solve_wide(cost, rows, cols);
    }

    let transposed: Vec<Vec<f64>> = (0..cols)
        .map(|j| (0..rows).map(|i| cost[i][j]).collect())
        .collect();
    let by_col = solve_wide(&transposed, cols, rows);
    let mut by_row = vec![None; rows];
    for (j, row) in by_col.into_iter().enumerate() {
        if let Some(i) = row {
            by_row[i] = Some(j);
        }
    }
    by_row
}

/// Requires `n <= m`. Indices inside are 1-based with 0 as the virtual column.
fn solve_wide(cost: &[Vec<f64>], n: usize, m: usize) -> Vec<Option<usize>> {
    let mut u = vec![0.0_f64; n + 1];
    let mut v = vec![0.0_f64; m + 1];
    // p[j]: row matched to column j (0 = none)
    let mut p = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let cur = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=m {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![None; n];
    for j in 1..=m {
        if p[j] != 0 {
            assignment[p[j] - 1] = Some(j - 1);
        }
    }
    assignment
}
