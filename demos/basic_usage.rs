//! Basic usage of the fakesmtp library
//!
//! Starts a capture server in memory mode on a free port, sends two emails
//! over a raw SMTP session and prints what was received.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use fakesmtp::{MailSaver, SaverConfig, ServerHandler, ServerModel};

fn main() {
    println!("fakesmtp basic usage");
    println!("====================");

    let saver = Arc::new(MailSaver::new(SaverConfig {
        memory_mode: true,
        ..SaverConfig::default()
    }));
    let emails = saver.subscribe();

    let handler = Arc::new(ServerHandler::new("example.local", Arc::clone(&saver)));
    let model = ServerModel::new(Arc::clone(&handler));
    model.set_port("0");
    model.set_host("127.0.0.1");
    if let Err(e) = model.toggle() {
        eprintln!("Server error: {e}");
        return;
    }

    let Some(addr) = handler.local_addr() else {
        eprintln!("Server has no address");
        return;
    };
    println!("Server started on {addr}");

    let messages = [
        (
            vec!["recipient@example.com"],
            "Subject: Test Email from fakesmtp\r\n\r\nThis is a test email.\r\n",
        ),
        (
            vec!["recipient@example.com", "another@example.com"],
            "Subject: Second Test Email\r\n\r\n.Dot-stuffed line.\r\n",
        ),
    ];

    for (recipients, body) in &messages {
        println!("\nSending email to {recipients:?}...");
        if let Err(e) = send_email(addr, "sender@example.com", recipients, body) {
            eprintln!("Failed to send email: {e}");
            return;
        }
    }

    println!("\nCollecting emails...");
    let mut received = Vec::new();
    while let Ok(email) = emails.recv_timeout(Duration::from_millis(500)) {
        println!("Email received:");
        println!("  From: {}", email.from);
        println!("  To: {:?}", email.to);
        println!("  Subject: {}", email.subject);
        println!("  Received at: {}", email.received_at);
        received.push(email);
    }

    println!("Collected {} email(s) total", received.len());
    println!(
        "Emails for another@example.com: {}",
        received
            .iter()
            .filter(|email| email.has_recipient("another@example.com"))
            .count()
    );

    handler.stop();
}

fn send_email(
    addr: SocketAddr,
    from: &str,
    recipients: &[&str],
    body: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect(addr)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut response = String::new();

    let mut exchange = |stream: &mut TcpStream, line: Option<&str>| -> std::io::Result<()> {
        if let Some(line) = line {
            write!(stream, "{line}\r\n")?;
        }
        response.clear();
        reader.read_line(&mut response)?;
        print!("S: {response}");
        Ok(())
    };

    exchange(&mut stream, None)?;
    exchange(&mut stream, Some("HELO client.example.com"))?;
    exchange(&mut stream, Some(&format!("MAIL FROM:<{from}>")))?;
    for recipient in recipients {
        exchange(&mut stream, Some(&format!("RCPT TO:<{recipient}>")))?;
    }
    exchange(&mut stream, Some("DATA"))?;

    for line in body.lines() {
        // leading dots are doubled on the wire
        if line.starts_with('.') {
            write!(stream, ".")?;
        }
        write!(stream, "{line}\r\n")?;
    }
    exchange(&mut stream, Some("."))?;
    exchange(&mut stream, Some("QUIT"))?;

    Ok(())
}
