//! Terraform configurations for the resources the agent can create.
//!
//! Each function renders a complete `main.tf` pinned to the AWS provider 5.x.

/// Tag value stamped on everything the agent provisions.
pub const MANAGED_BY: &str = "InfraPilot";

/// Amazon Linux 2 AMI per region; unknown regions fall back to us-east-1.
pub fn default_ami(region: &str) -> &'static str {
    match region {
        "us-west-2" => "ami-0d1cd67c26f5fca19",
        _ => "ami-0c55b159cbfafe1f0",
    }
}

fn header(region: &str) -> String {
    format!(
        r#"terraform {{
  required_providers {{
    aws = {{
      source  = "hashicorp/aws"
      version = "~> 5.0"
    }}
  }}
}}

provider "aws" {{
  region = "{region}"
}}
"#
    )
}

pub fn ec2_instance(instance_type: &str, ami_id: Option<&str>, region: &str) -> String {
    let ami_id = ami_id.unwrap_or_else(|| default_ami(region));
    format!(
        r#"{header}
resource "aws_security_group" "instance_sg" {{
  name        = "allow_ssh_http"
  description = "Allow SSH and HTTP traffic"

  ingress {{
    from_port   = 22
    to_port     = 22
    protocol    = "tcp"
    cidr_blocks = ["0.0.0.0/0"]
  }}

  ingress {{
    from_port   = 80
    to_port     = 80
    protocol    = "tcp"
    cidr_blocks = ["0.0.0.0/0"]
  }}

  egress {{
    from_port   = 0
    to_port     = 0
    protocol    = "-1"
    cidr_blocks = ["0.0.0.0/0"]
  }}
}}

resource "aws_instance" "main" {{
  ami                    = "{ami_id}"
  instance_type          = "{instance_type}"
  vpc_security_group_ids = [aws_security_group.instance_sg.id]

  tags = {{
    Name      = "Production-Instance"
    ManagedBy = "{MANAGED_BY}"
  }}
}}

output "instance_id" {{
  value = aws_instance.main.id
}}

output "public_ip" {{
  value = aws_instance.main.public_ip
}}
"#,
        header = header(region),
    )
}

pub fn s3_bucket(bucket_name: &str, region: &str, versioning: bool) -> String {
    let versioning_block = if versioning {
        r#"
resource "aws_s3_bucket_versioning" "main" {
  bucket = aws_s3_bucket.main.id
  versioning_configuration {
    status = "Enabled"
  }
}
"#
    } else {
        ""
    };

    format!(
        r#"{header}
resource "aws_s3_bucket" "main" {{
  bucket = "{bucket_name}"

  tags = {{
    Name      = "{bucket_name}"
    ManagedBy = "{MANAGED_BY}"
  }}
}}
{versioning_block}
output "bucket_name" {{
  value = aws_s3_bucket.main.id
}}

output "bucket_arn" {{
  value = aws_s3_bucket.main.arn
}}
"#,
        header = header(region),
    )
}

/// VPC with two public and two private subnets spread over two AZs.
pub fn vpc_network(cidr_block: &str, region: &str) -> String {
    format!(
        r#"{header}
data "aws_availability_zones" "available" {{
  state = "available"
}}

resource "aws_vpc" "main" {{
  cidr_block           = "{cidr_block}"
  enable_dns_hostnames = true
  enable_dns_support   = true

  tags = {{
    Name      = "Production-VPC"
    ManagedBy = "{MANAGED_BY}"
  }}
}}

resource "aws_subnet" "public" {{
  count                   = 2
  vpc_id                  = aws_vpc.main.id
  cidr_block              = cidrsubnet(aws_vpc.main.cidr_block, 8, count.index)
  availability_zone       = data.aws_availability_zones.available.names[count.index]
  map_public_ip_on_launch = true

  tags = {{
    Name = "Public-Subnet-${{count.index + 1}}"
  }}
}}

resource "aws_subnet" "private" {{
  count             = 2
  vpc_id            = aws_vpc.main.id
  cidr_block        = cidrsubnet(aws_vpc.main.cidr_block, 8, count.index + 2)
  availability_zone = data.aws_availability_zones.available.names[count.index]

  tags = {{
    Name = "Private-Subnet-${{count.index + 1}}"
  }}
}}

resource "aws_internet_gateway" "main" {{
  vpc_id = aws_vpc.main.id

  tags = {{
    Name = "Production-IGW"
  }}
}}

resource "aws_route_table" "public" {{
  vpc_id = aws_vpc.main.id

  route {{
    cidr_block = "0.0.0.0/0"
    gateway_id = aws_internet_gateway.main.id
  }}
}}

resource "aws_route_table_association" "public" {{
  count          = 2
  subnet_id      = aws_subnet.public[count.index].id
  route_table_id = aws_route_table.public.id
}}

output "vpc_id" {{
  value = aws_vpc.main.id
}}

output "public_subnet_ids" {{
  value = aws_subnet.public[*].id
}}

output "private_subnet_ids" {{
  value = aws_subnet.private[*].id
}}
"#,
        header = header(region),
    )
}

/// PostgreSQL 15 instance. The password is a placeholder the user must replace.
pub fn rds_instance(db_name: &str, instance_class: &str, region: &str) -> String {
    format!(
        r#"{header}
resource "aws_db_instance" "default" {{
  allocated_storage    = 20
  db_name              = "{db_name}"
  engine               = "postgres"
  engine_version       = "15"
  instance_class       = "{instance_class}"
  username             = "adminuser"
  password             = "REPLACE_WITH_SECURE_PASSWORD"
  parameter_group_name = "default.postgres15"
  skip_final_snapshot  = true

  tags = {{
    Name      = "{db_name}"
    ManagedBy = "{MANAGED_BY}"
  }}
}}

output "endpoint" {{
  value = aws_db_instance.default.endpoint
}}
"#,
        header = header(region),
    )
}

/// Python 3.9 function deployed from `lambda_function_payload.zip`.
pub fn lambda_function(function_name: &str, region: &str) -> String {
    format!(
        r#"{header}
resource "aws_iam_role" "iam_for_lambda" {{
  name = "iam_for_lambda_{function_name}"

  assume_role_policy = jsonencode({{
    Version = "2012-10-17"
    Statement = [
      {{
        Action = "sts:AssumeRole"
        Effect = "Allow"
        Sid    = ""
        Principal = {{
          Service = "lambda.amazonaws.com"
        }}
      }},
    ]
  }})
}}

resource "aws_lambda_function" "main" {{
  filename      = "{LAMBDA_PAYLOAD}"
  function_name = "{function_name}"
  role          = aws_iam_role.iam_for_lambda.arn
  handler       = "index.handler"
  runtime       = "python3.9"

  tags = {{
    ManagedBy = "{MANAGED_BY}"
  }}
}}

output "function_arn" {{
  value = aws_lambda_function.main.arn
}}
"#,
        header = header(region),
    )
}

/// Archive the Lambda resource points at.
pub const LAMBDA_PAYLOAD: &str = "lambda_function_payload.zip";

/// Stub handler packed into the Lambda payload.
pub const LAMBDA_HANDLER_SOURCE: &str = "def handler(event, context):\n    print(\"Hello from InfraPilot Lambda!\")\n    return {\"statusCode\": 200, \"body\": \"Success\"}\n";
