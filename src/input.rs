//! Reading and validating input balls.
//!
//! The text format is one ball per line, `x y z r`, with everything after the
//! comment marker ignored. Extra columns after the radius are allowed.

use std::io::BufRead;

use log::debug;

use crate::error::{Error, Result};
use crate::types::Ball;

/// Parse balls from a reader.
///
/// # Errors
/// Returns [`Error::MalformedLine`] for a non-empty line without four leading
/// numbers, or [`Error::Io`] if reading fails.
pub fn read_balls<R: BufRead>(reader: R, comment_marker: &str) -> Result<Vec<Ball>> {
    let mut balls = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let content = if comment_marker.is_empty() {
            line.as_str()
        } else {
            line.split(comment_marker).next().unwrap_or_default()
        };
        if content.trim().is_empty() {
            continue;
        }
        let ball = parse_ball(content).ok_or_else(|| Error::MalformedLine {
            line: number + 1,
            content: line.clone(),
        })?;
        balls.push(ball);
    }
    debug!("Parsed {} balls", balls.len());
    Ok(balls)
}

fn parse_ball(content: &str) -> Option<Ball> {
    let mut values = content.split_whitespace().map(str::parse::<f64>);
    let x = values.next()?.ok()?;
    let y = values.next()?.ok()?;
    let z = values.next()?.ok()?;
    let r = values.next()?.ok()?;
    Some(Ball::new(x, y, z, r))
}

/// Check that there are enough balls and all of them are usable.
///
/// # Errors
/// Returns [`Error::TooFewBalls`] for fewer than four balls and
/// [`Error::InvalidBall`] for non-finite values or a negative radius.
pub fn validate_balls(balls: &[Ball]) -> Result<()> {
    if balls.len() < 4 {
        return Err(Error::TooFewBalls(balls.len()));
    }
    for (index, ball) in balls.iter().enumerate() {
        if ![ball.x, ball.y, ball.z, ball.r].iter().all(|v| v.is_finite()) {
            return Err(Error::InvalidBall {
                index,
                reason: "non-finite value",
            });
        }
        if ball.r < 0.0 {
            return Err(Error::InvalidBall {
                index,
                reason: "negative radius",
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_balls_with_comments() {
        let data = "# header\n1 2 3 4\n\n5.5 6 7 0.5 # trailing\n  8 9 10 1 extra\n";
        let balls = read_balls(data.as_bytes(), "#").unwrap();
        assert_eq!(
            balls,
            vec![
                Ball::new(1.0, 2.0, 3.0, 4.0),
                Ball::new(5.5, 6.0, 7.0, 0.5),
                Ball::new(8.0, 9.0, 10.0, 1.0),
            ]
        );
    }

    #[test]
    fn custom_comment_marker() {
        let data = "% skip me\n1 1 1 1\n";
        assert_eq!(read_balls(data.as_bytes(), "%").unwrap().len(), 1);
    }

    #[test]
    fn malformed_line_is_reported() {
        let data = "1 2 3 4\n1 2 x 4\n";
        match read_balls(data.as_bytes(), "#") {
            Err(Error::MalformedLine { line, content }) => {
                assert_eq!(line, 2);
                assert_eq!(content, "1 2 x 4");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(read_balls("1 2 3\n".as_bytes(), "#").is_err());
    }

    #[test]
    fn validation() {
        let mut balls = vec![Ball::new(0.0, 0.0, 0.0, 1.0); 4];
        assert!(validate_balls(&balls).is_ok());
        assert!(matches!(
            validate_balls(&balls[..3]),
            Err(Error::TooFewBalls(3))
        ));
        balls[1].r = -1.0;
        assert!(matches!(
            validate_balls(&balls),
            Err(Error::InvalidBall { index: 1, .. })
        ));
        balls[1].r = 1.0;
        balls[3].y = f64::INFINITY;
        assert!(matches!(
            validate_balls(&balls),
            Err(Error::InvalidBall { index: 3, .. })
        ));
    }
}
